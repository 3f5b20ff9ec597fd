//! Scanner session core exposed to Swift via UniFFI
//!
//! Methods block on an owned Tokio runtime; call them off the main queue.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::info;

use scanshell_core::config::ScanConfig;
use scanshell_core::embed::EmbeddedSession;
use scanshell_core::{
    CoordinatorOptions, NativeEvent, Platform, ScannerMode, SessionEvent,
    SessionLifecycleCoordinator,
};

use crate::bridge::{BridgeConnectivity, IosCamera, ScannerBridge};
use crate::error::ScanError;

const PREFS_FILE: &str = "scanshell_prefs.json";

/// Events delivered to Swift screens
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum ScanEvent {
    LicenseValidated { response: String },
    LicenseValidationFailed { reason: String },
    CameraReady,
    ScanDecoded { text: String },
}

impl From<SessionEvent> for ScanEvent {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::LicenseValidated(response) => ScanEvent::LicenseValidated { response },
            SessionEvent::LicenseValidationFailed(reason) => {
                ScanEvent::LicenseValidationFailed { reason }
            }
            SessionEvent::CameraReady => ScanEvent::CameraReady,
            SessionEvent::ScanDecoded(text) => ScanEvent::ScanDecoded { text },
        }
    }
}

/// Scanner core interface exposed to Swift
#[derive(uniffi::Object)]
pub struct ScanCore {
    runtime: Runtime,
    camera: Arc<IosCamera>,
    session: EmbeddedSession,
}

#[uniffi::export]
impl ScanCore {
    /// Create the scanner core from TOML configuration. Without a configured
    /// store path the preference file goes into `documents_dir`.
    #[uniffi::constructor]
    pub fn new(
        bridge: Arc<dyn ScannerBridge>,
        config_toml: String,
        documents_dir: Option<String>,
    ) -> Result<Arc<Self>, ScanError> {
        let mut config = ScanConfig::from_toml_str(&config_toml)?;
        if config.storage.path.is_none() {
            config.storage.path = documents_dir.map(|dir| PathBuf::from(dir).join(PREFS_FILE));
        }
        config.validate()?;
        let options = CoordinatorOptions::from_config(&config, Platform::Ios)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("scanshell")
            .enable_all()
            .build()
            .map_err(|e| ScanError::Runtime(e.to_string()))?;

        let camera = Arc::new(IosCamera::new(bridge.clone()));
        let session = {
            let _guard = runtime.enter();
            let coordinator = SessionLifecycleCoordinator::new(
                camera.clone(),
                config.open_store(),
                Arc::new(BridgeConnectivity::new(bridge)),
                options,
            );
            EmbeddedSession::new(coordinator)
        };

        info!("ios scanner core created");
        Ok(Arc::new(Self {
            runtime,
            camera,
            session,
        }))
    }

    /// Layout pass of a scanner container view.
    pub fn report_layout(&self, container_id: u64, width: f64, height: f64) {
        self.session.report_layout(container_id, width, height);
    }

    pub fn forget_container(&self, container_id: u64) {
        self.session.forget_container(container_id);
    }

    pub fn initialize(&self, container_id: u64) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.initialize(container_id))?)
    }

    pub fn retry(&self, container_id: u64) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.retry(container_id))?)
    }

    pub fn clear_saved_license(&self) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.clear_saved_license())?)
    }

    /// Lease the camera; returns the lease id.
    pub fn acquire_camera(&self, container_id: Option<u64>) -> Result<u64, ScanError> {
        Ok(self
            .runtime
            .block_on(self.session.acquire_camera(container_id))?)
    }

    pub fn return_camera(&self) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.return_camera())?)
    }

    pub fn start_camera(&self) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.start_camera())?)
    }

    pub fn stop_camera(&self) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.stop_camera())?)
    }

    pub fn set_torch(&self, enabled: bool) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.set_torch(enabled))?)
    }

    /// Switch decoder mode by the label shown in the scan type list.
    pub fn select_scan_type(&self, name: String) -> Result<(), ScanError> {
        let mode = ScannerMode::from_selection_name(&name);
        Ok(self.runtime.block_on(self.session.set_scanner_mode(mode))?)
    }

    pub fn is_fully_initialized(&self) -> bool {
        self.session.coordinator().is_fully_initialized()
    }

    pub fn is_first_time_use(&self) -> bool {
        self.runtime
            .block_on(self.session.coordinator().is_first_time_use())
    }

    pub fn is_validation_in_progress(&self) -> bool {
        self.session.coordinator().is_validation_in_progress()
    }

    pub fn last_error(&self) -> Option<String> {
        self.session.coordinator().last_error()
    }

    pub fn license_key(&self) -> String {
        self.session.coordinator().license_key().to_string()
    }

    pub fn poll_event(&self) -> Option<ScanEvent> {
        self.session.poll_event().map(ScanEvent::from)
    }

    /// SDK license delegate callback.
    pub fn on_license_result(&self, success: bool, message: String) -> bool {
        let event = if success {
            NativeEvent::LicenseSucceeded(message)
        } else {
            NativeEvent::LicenseFailed(message)
        };
        self.camera.deliver(event)
    }

    /// SDK decode delegate callback.
    pub fn on_scan_decoded(&self, text: String) -> bool {
        self.camera.deliver(NativeEvent::ScanDecoded(text))
    }

    pub fn shutdown(&self) {
        self.runtime
            .block_on(self.session.coordinator().shutdown());
    }
}
