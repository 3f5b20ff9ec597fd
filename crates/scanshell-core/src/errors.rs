//! Error types for ScanShell Core.
//!
//! Every failure the coordinator can report is a [`SessionError`]. None of
//! them is fatal to the process; the UI layer decides whether to offer a retry.

use thiserror::Error;

use crate::store::StoreError;

/// Reason reported when the pre-flight connectivity check fails.
pub const NO_CONNECTIVITY_MESSAGE: &str =
    "No internet connection. Please connect to the internet for first-time activation.";

/// Unified error type for session lifecycle operations.
///
/// `Clone` so one resolved outcome can be handed to every waiter of an
/// in-flight initialization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Pre-flight network check failed before validating online
    #[error("{0}")]
    NoConnectivity(String),

    /// The SDK or its license server rejected the license
    #[error("{0}")]
    ValidationFailure(String),

    /// A camera lease is already outstanding
    #[error("camera is already leased; return it before requesting it again")]
    ResourceBusy,

    /// Camera requested before the coordinator reached `Ready`
    #[error("scanner is not initialized; restart from the entry flow")]
    NotReady,

    /// A native session call threw; the handle stays usable
    #[error("camera error: {0}")]
    Camera(String),

    /// Persisted license state could not be read or written
    #[error("store error: {0}")]
    Store(String),
}

impl SessionError {
    /// Human-readable reason suitable for the entry flow's error view.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Failures that clear persisted license state.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            SessionError::NoConnectivity(_) | SessionError::ValidationFailure(_)
        )
    }

    /// Programming-contract violations: the screen must redirect to the entry flow.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, SessionError::ResourceBusy | SessionError::NotReady)
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e.to_string())
    }
}
