//! Swift-side scanner view operations and the [`NativeCamera`] built on them.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use scanshell_core::{Connectivity, EventSink, NativeCamera, NativeEvent, Platform, ScannerMode, Surface};

/// Implemented in Swift. Each call hops to the main queue before touching
/// the SDK's scanner view; SDK errors come back through the event callbacks.
#[uniffi::export(with_foreign)]
pub trait ScannerBridge: Send + Sync {
    fn create_scan_session(&self, license_key: String, decode_config: i32, container_id: u64);

    fn add_to_container(&self, container_id: u64);

    fn remove_from_container(&self);

    fn validate_license(&self, license_key: String);

    fn start_scanning(&self);

    fn stop_scanning(&self);

    fn enable_torch(&self, enabled: bool);

    fn set_decode_config(&self, decode_config: i32);

    /// `NWPathMonitor` status.
    fn network_available(&self) -> bool;
}

pub struct IosCamera {
    bridge: Arc<dyn ScannerBridge>,
    sink: Mutex<Option<EventSink>>,
}

impl IosCamera {
    pub fn new(bridge: Arc<dyn ScannerBridge>) -> Self {
        Self {
            bridge,
            sink: Mutex::new(None),
        }
    }

    pub fn deliver(&self, event: NativeEvent) -> bool {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => sink.post(event),
            None => {
                debug!(?event, "SDK callback before registration, dropping");
                false
            }
        }
    }
}

#[async_trait]
impl NativeCamera for IosCamera {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    fn register_events(&self, sink: EventSink) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    async fn create_session(
        &self,
        license_key: &str,
        mode: ScannerMode,
        surface: Surface,
    ) -> anyhow::Result<()> {
        self.bridge
            .create_scan_session(license_key.to_string(), mode.code(), surface.container_id);
        Ok(())
    }

    async fn attach_surface(&self, surface: Surface) -> anyhow::Result<()> {
        self.bridge.remove_from_container();
        self.bridge.add_to_container(surface.container_id);
        Ok(())
    }

    async fn detach_surface(&self) -> anyhow::Result<()> {
        self.bridge.remove_from_container();
        Ok(())
    }

    async fn validate_license(&self, license_key: &str) -> anyhow::Result<()> {
        self.bridge.validate_license(license_key.to_string());
        Ok(())
    }

    async fn start_session(&self) -> anyhow::Result<()> {
        self.bridge.start_scanning();
        Ok(())
    }

    async fn stop_session(&self) -> anyhow::Result<()> {
        self.bridge.stop_scanning();
        Ok(())
    }

    async fn set_torch(&self, enabled: bool) -> anyhow::Result<()> {
        self.bridge.enable_torch(enabled);
        Ok(())
    }

    async fn set_scanner_mode(&self, mode: ScannerMode) -> anyhow::Result<()> {
        self.bridge.set_decode_config(mode.code());
        Ok(())
    }
}

pub struct BridgeConnectivity {
    bridge: Arc<dyn ScannerBridge>,
}

impl BridgeConnectivity {
    pub fn new(bridge: Arc<dyn ScannerBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Connectivity for BridgeConnectivity {
    async fn has_internet(&self) -> bool {
        self.bridge.network_available()
    }
}
