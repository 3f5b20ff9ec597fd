//! Scanner session core for Android
//!
//! Owns the Tokio runtime and the embedded session. Every method blocks on
//! the runtime and must be called from a background thread; the SDK calls it
//! makes are marshalled to the main looper by the Kotlin bridge.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use scanshell_core::config::ScanConfig;
use scanshell_core::embed::EmbeddedSession;
use scanshell_core::{
    ContainerId, CoordinatorOptions, NativeEvent, Platform, ScannerMode, SessionEvent,
    SessionLifecycleCoordinator,
};

use crate::camera::{AndroidCamera, BridgeConnectivity};
use crate::error::ScanError;
use crate::preview::PreviewBridge;

const PREFS_FILE: &str = "scanshell_prefs.json";

/// Event as handed to Kotlin, JSON encoded.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
enum EventPayload {
    LicenseValidated(String),
    LicenseValidationFailed(String),
    CameraReady,
    ScanDecoded(String),
}

impl From<SessionEvent> for EventPayload {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::LicenseValidated(m) => EventPayload::LicenseValidated(m),
            SessionEvent::LicenseValidationFailed(m) => EventPayload::LicenseValidationFailed(m),
            SessionEvent::CameraReady => EventPayload::CameraReady,
            SessionEvent::ScanDecoded(m) => EventPayload::ScanDecoded(m),
        }
    }
}

fn container_id(id: i64) -> Result<ContainerId, ScanError> {
    ContainerId::try_from(id)
        .map_err(|_| ScanError::InvalidParameter(format!("invalid container id {id}")))
}

/// Scanner session instance for Android
pub struct ScanCore {
    runtime: Runtime,
    camera: Arc<AndroidCamera>,
    session: EmbeddedSession,
}

impl ScanCore {
    pub fn new(bridge: Arc<dyn PreviewBridge>, config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        let options = CoordinatorOptions::from_config(&config, Platform::Android)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("scanshell")
            .enable_all()
            .build()
            .map_err(|e| ScanError::Runtime(e.to_string()))?;

        let camera = Arc::new(AndroidCamera::new(bridge.clone(), config.scanner.crop_ratio));
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

        info!("android scanner core created");
        Ok(Self {
            runtime,
            camera,
            session,
        })
    }

    /// Build from TOML text. Without a configured store path, the preference
    /// file is placed in `files_dir`.
    pub fn from_toml(
        bridge: Arc<dyn PreviewBridge>,
        config_toml: &str,
        files_dir: Option<&str>,
    ) -> Result<Self, ScanError> {
        let mut config = ScanConfig::from_toml_str(config_toml)?;
        if config.storage.path.is_none() {
            config.storage.path = files_dir.map(|dir| PathBuf::from(dir).join(PREFS_FILE));
        }
        Self::new(bridge, config)
    }

    pub fn report_layout(&self, container: i64, width: f64, height: f64) -> Result<(), ScanError> {
        self.session.report_layout(container_id(container)?, width, height);
        Ok(())
    }

    pub fn forget_container(&self, container: i64) -> Result<(), ScanError> {
        self.session.forget_container(container_id(container)?);
        Ok(())
    }

    /// Initialize into `container`. False on failure; see [`ScanCore::last_error`].
    pub fn initialize(&self, container: i64) -> bool {
        self.run_lifecycle(container, false)
    }

    /// Retry after a failure, validating online.
    pub fn retry(&self, container: i64) -> bool {
        self.run_lifecycle(container, true)
    }

    fn run_lifecycle(&self, container: i64, retry: bool) -> bool {
        let id = match container_id(container) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "initialize rejected");
                return false;
            }
        };
        let result = if retry {
            self.runtime.block_on(self.session.retry(id))
        } else {
            self.runtime.block_on(self.session.initialize(id))
        };
        result.is_ok()
    }

    /// Lease the camera, moving the preview into `container` when it is not negative.
    pub fn acquire_camera(&self, container: i64) -> Result<u64, ScanError> {
        let target = if container < 0 {
            None
        } else {
            Some(container_id(container)?)
        };
        Ok(self.runtime.block_on(self.session.acquire_camera(target))?)
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

    pub fn set_scanner_mode(&self, code: i32) -> Result<(), ScanError> {
        let mode = ScannerMode::from_code(code);
        Ok(self.runtime.block_on(self.session.set_scanner_mode(mode))?)
    }

    pub fn clear_saved_license(&self) -> Result<(), ScanError> {
        Ok(self.runtime.block_on(self.session.clear_saved_license())?)
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

    /// Next event as JSON, e.g. `{"type":"scan_decoded","message":"..."}`.
    pub fn poll_event_json(&self) -> Result<Option<String>, ScanError> {
        match self.session.poll_event() {
            Some(event) => Ok(Some(serde_json::to_string(&EventPayload::from(event))?)),
            None => Ok(None),
        }
    }

    /// SDK license callback.
    pub fn on_license_result(&self, success: bool, message: &str) -> bool {
        let event = if success {
            NativeEvent::LicenseSucceeded(message.to_string())
        } else {
            NativeEvent::LicenseFailed(message.to_string())
        };
        self.camera.deliver(event)
    }

    /// SDK decode callback.
    pub fn on_scan_decoded(&self, text: &str) -> bool {
        self.camera.deliver(NativeEvent::ScanDecoded(text.to_string()))
    }

    pub fn shutdown(&self) {
        self.runtime
            .block_on(self.session.coordinator().shutdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct FakeBridge {
        online: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBridge {
        fn new(online: bool) -> Self {
            Self {
                online,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: String) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn saw(&self, prefix: &str) -> bool {
            self.calls.lock().unwrap().iter().any(|c| c.starts_with(prefix))
        }
    }

    impl PreviewBridge for FakeBridge {
        fn create_scan_session(
            &self,
            license_key: &str,
            decode_config: i32,
            crop_ratio: f32,
            container_id: i64,
        ) -> anyhow::Result<()> {
            self.record(format!(
                "create {license_key} {decode_config} {crop_ratio} {container_id}"
            ))
        }

        fn add_to_container(&self, container_id: i64) -> anyhow::Result<()> {
            self.record(format!("add {container_id}"))
        }

        fn remove_from_container(&self) -> anyhow::Result<()> {
            self.record("remove".into())
        }

        fn validate_license(&self, license_key: &str) -> anyhow::Result<()> {
            self.record(format!("validate {license_key}"))
        }

        fn start_scanning(&self) -> anyhow::Result<()> {
            self.record("start".into())
        }

        fn stop_scanning(&self) -> anyhow::Result<()> {
            self.record("stop".into())
        }

        fn enable_torch(&self, enabled: bool) -> anyhow::Result<()> {
            self.record(format!("torch {enabled}"))
        }

        fn set_decode_config(&self, decode_config: i32) -> anyhow::Result<()> {
            self.record(format!("decode {decode_config}"))
        }

        fn network_available(&self) -> bool {
            self.online
        }
    }

    const CONFIG: &str = r#"
        [license]
        android_key = "android-key"
        ios_key = "ios-key"

        [scanner]
        mode = "qr_code"
    "#;

    fn core(bridge: &Arc<FakeBridge>, dir: &tempfile::TempDir) -> Arc<ScanCore> {
        let files_dir = dir.path().to_str().unwrap();
        Arc::new(ScanCore::from_toml(bridge.clone(), CONFIG, Some(files_dir)).unwrap())
    }

    fn answer_validation(core: &Arc<ScanCore>, bridge: &Arc<FakeBridge>, success: bool) {
        let core = core.clone();
        let bridge = bridge.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !bridge.saw("validate") && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            core.on_license_result(success, if success { "ok" } else { "invalid key" });
        });
    }

    #[test]
    fn test_first_activation_through_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(FakeBridge::new(true));
        let core = core(&bridge, &dir);
        assert!(core.is_first_time_use());
        assert_eq!(core.license_key(), "android-key");

        core.report_layout(5, 1080.0, 1920.0).unwrap();
        answer_validation(&core, &bridge, true);
        assert!(core.initialize(5));

        assert!(core.is_fully_initialized());
        assert!(!core.is_first_time_use());
        assert!(bridge.saw("create android-key 0 0.2 5"));
        assert!(dir.path().join(PREFS_FILE).exists());

        assert_eq!(
            core.poll_event_json().unwrap().as_deref(),
            Some(r#"{"type":"license_validated","message":"ok"}"#)
        );
        assert_eq!(
            core.poll_event_json().unwrap().as_deref(),
            Some(r#"{"type":"camera_ready"}"#)
        );
    }

    #[test]
    fn test_offline_first_use_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(FakeBridge::new(false));
        let core = core(&bridge, &dir);

        core.report_layout(5, 1080.0, 1920.0).unwrap();
        assert!(!core.initialize(5));
        assert!(core
            .last_error()
            .unwrap()
            .contains("No internet connection"));
        assert!(!bridge.saw("validate"));
        assert!(!bridge.saw("create"));
    }

    #[test]
    fn test_lease_moves_preview() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(FakeBridge::new(true));
        let core = core(&bridge, &dir);
        core.report_layout(1, 100.0, 100.0).unwrap();
        answer_validation(&core, &bridge, true);
        assert!(core.initialize(1));

        core.report_layout(2, 100.0, 100.0).unwrap();
        core.acquire_camera(2).unwrap();
        assert!(bridge.saw("add 2"));
        assert!(matches!(core.acquire_camera(-1), Err(ScanError::Session(_))));

        core.start_camera().unwrap();
        core.set_scanner_mode(1).unwrap();
        assert!(bridge.saw("decode 1"));
        core.return_camera().unwrap();
        assert!(bridge.saw("stop"));
        core.shutdown();
    }

    #[test]
    fn test_decode_callback_reaches_poller() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(FakeBridge::new(true));
        let core = core(&bridge, &dir);

        assert!(core.on_scan_decoded("4006381333931"));
        let deadline = Instant::now() + Duration::from_secs(5);
        let event = loop {
            if let Some(event) = core.poll_event_json().unwrap() {
                break event;
            }
            assert!(Instant::now() < deadline, "decode event never arrived");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(event, r#"{"type":"scan_decoded","message":"4006381333931"}"#);
    }

    #[test]
    fn test_negative_container_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(FakeBridge::new(true));
        let core = core(&bridge, &dir);
        assert!(matches!(
            core.report_layout(-3, 1.0, 1.0),
            Err(ScanError::InvalidParameter(_))
        ));
        assert!(!core.initialize(-3));
    }
}
