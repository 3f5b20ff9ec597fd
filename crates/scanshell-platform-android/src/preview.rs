//! Kotlin-side scanner view operations.
//!
//! Each call is expected to marshal onto the main looper before touching the
//! SDK's preview view. Errors are reported as strings from the Java side.

/// Operations the Kotlin `ScanBridge` object exposes to Rust.
pub trait PreviewBridge: Send + Sync {
    /// Build the SDK scanner view inside `container_id`.
    fn create_scan_session(
        &self,
        license_key: &str,
        decode_config: i32,
        crop_ratio: f32,
        container_id: i64,
    ) -> anyhow::Result<()>;

    /// Re-parent the existing preview into `container_id`.
    fn add_to_container(&self, container_id: i64) -> anyhow::Result<()>;

    /// Remove the preview from its parent without releasing it.
    fn remove_from_container(&self) -> anyhow::Result<()>;

    /// Ask the SDK to validate `license_key`; the answer comes back through
    /// `nativeOnLicenseResult`.
    fn validate_license(&self, license_key: &str) -> anyhow::Result<()>;

    fn start_scanning(&self) -> anyhow::Result<()>;

    fn stop_scanning(&self) -> anyhow::Result<()>;

    fn enable_torch(&self, enabled: bool) -> anyhow::Result<()>;

    fn set_decode_config(&self, decode_config: i32) -> anyhow::Result<()>;

    /// `ConnectivityManager` check for a validated internet capability.
    fn network_available(&self) -> bool;
}
