//! Shared types for the session lifecycle.

use serde::{Deserialize, Serialize};

// ============================================================================
// State Enums
// ============================================================================

/// Progress of license validation as seen by the validation gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationState {
    /// No validation has succeeded (or the last one was cleared)
    Unvalidated,
    /// A validation round-trip is outstanding
    Validating,
    /// The license is validated, either silently or through the SDK
    Validated,
    /// The last initialization attempt failed
    Failed,
}

/// State of the session lifecycle coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing initialized yet, or reset by `clear_saved_license`
    Idle,
    /// Initialization is in flight
    Validating,
    /// Camera and license are ready for screens
    Ready,
    /// Initialization failed; a retry forces the network path
    Failed,
}

// ============================================================================
// Persisted License
// ============================================================================

/// Persisted outcome of a successful license validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// License identifier that was validated
    pub license_identifier: String,
    /// Whether the identifier passed validation
    pub validated: bool,
}

impl LicenseRecord {
    /// Record for an identifier that just passed validation.
    pub fn validated(license_identifier: impl Into<String>) -> Self {
        Self {
            license_identifier: license_identifier.into(),
            validated: true,
        }
    }

    /// True when this record allows the silent path for `identifier`.
    pub fn matches(&self, identifier: &str) -> bool {
        self.validated && self.license_identifier == identifier
    }
}

// ============================================================================
// Readiness
// ============================================================================

/// Readiness flags consulted by every screen before touching the camera.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadinessFlags {
    pub initialized: bool,
    pub license_validated: bool,
    pub camera_ready: bool,
}

impl ReadinessFlags {
    /// All flags set.
    pub fn ready() -> Self {
        Self {
            initialized: true,
            license_validated: true,
            camera_ready: true,
        }
    }

    /// Screens must restart from the entry flow when this is false.
    pub fn fully_initialized(&self) -> bool {
        self.initialized && self.license_validated && self.camera_ready
    }
}

// ============================================================================
// Display Surfaces
// ============================================================================

/// Platform identifier of a display container.
pub type ContainerId = u64;

/// Layout bounds reported by a display container.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Zero-sized (or not yet laid out) bounds.
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// A laid-out container the native preview can be bound to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Surface {
    pub container_id: ContainerId,
    pub bounds: Bounds,
}

// ============================================================================
// Scanner Modes
// ============================================================================

/// Decoder configuration handed to the native SDK.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerMode {
    QrCode,
    Barcode,
    #[default]
    Any,
    OneOfMany,
    BatchInventory,
}

impl ScannerMode {
    pub const ALL: [ScannerMode; 5] = [
        ScannerMode::QrCode,
        ScannerMode::Barcode,
        ScannerMode::Any,
        ScannerMode::OneOfMany,
        ScannerMode::BatchInventory,
    ];

    /// Integer code understood by the native SDKs.
    pub fn code(self) -> i32 {
        match self {
            ScannerMode::QrCode => 0,
            ScannerMode::Barcode => 1,
            ScannerMode::Any => 2,
            ScannerMode::OneOfMany => 3,
            ScannerMode::BatchInventory => 4,
        }
    }

    /// Inverse of [`ScannerMode::code`]; unknown codes decode as `Any`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ScannerMode::QrCode,
            1 => ScannerMode::Barcode,
            3 => ScannerMode::OneOfMany,
            4 => ScannerMode::BatchInventory,
            _ => ScannerMode::Any,
        }
    }

    /// Maps a scan selection label ("QR Code", "Batch/ Inventory", ...) to a mode.
    pub fn from_selection_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("qr") {
            ScannerMode::QrCode
        } else if name.contains("barcode") {
            ScannerMode::Barcode
        } else if name.contains("any") {
            ScannerMode::Any
        } else if name.contains("batch") {
            ScannerMode::BatchInventory
        } else {
            ScannerMode::Any
        }
    }
}

// ============================================================================
// Validation Outcome
// ============================================================================

/// How a successful validation was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationPath {
    /// Saved record matched the current identifier; the SDK was not contacted
    Silent,
    /// Full round-trip through the SDK
    Network,
}

/// Successful validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    /// SDK response payload (network path only)
    pub payload: Option<String>,
    pub path: ValidationPath,
}

impl Validation {
    pub fn silent() -> Self {
        Self {
            payload: None,
            path: ValidationPath::Silent,
        }
    }

    pub fn network(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            path: ValidationPath::Network,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events broadcast to screens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The SDK accepted the license; carries the SDK response
    LicenseValidated(String),
    /// Validation failed; carries a human-readable reason
    LicenseValidationFailed(String),
    /// The coordinator reached `Ready`
    CameraReady,
    /// A code was decoded by the native session
    ScanDecoded(String),
}
