//! [`NativeCamera`] over the Kotlin preview bridge.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use scanshell_core::{Connectivity, EventSink, NativeCamera, NativeEvent, Platform, ScannerMode, Surface};

use crate::preview::PreviewBridge;

pub struct AndroidCamera {
    bridge: Arc<dyn PreviewBridge>,
    crop_ratio: f32,
    sink: Mutex<Option<EventSink>>,
}

impl AndroidCamera {
    pub fn new(bridge: Arc<dyn PreviewBridge>, crop_ratio: f32) -> Self {
        Self {
            bridge,
            crop_ratio,
            sink: Mutex::new(None),
        }
    }

    /// Forward an SDK callback to the coordinator. False if nobody listens.
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

fn container_handle(surface: Surface) -> i64 {
    surface.container_id as i64
}

#[async_trait]
impl NativeCamera for AndroidCamera {
    fn platform(&self) -> Platform {
        Platform::Android
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
        self.bridge.create_scan_session(
            license_key,
            mode.code(),
            self.crop_ratio,
            container_handle(surface),
        )
    }

    async fn attach_surface(&self, surface: Surface) -> anyhow::Result<()> {
        self.bridge.remove_from_container()?;
        self.bridge.add_to_container(container_handle(surface))
    }

    async fn detach_surface(&self) -> anyhow::Result<()> {
        self.bridge.remove_from_container()
    }

    async fn validate_license(&self, license_key: &str) -> anyhow::Result<()> {
        self.bridge.validate_license(license_key)
    }

    async fn start_session(&self) -> anyhow::Result<()> {
        self.bridge.start_scanning()
    }

    async fn stop_session(&self) -> anyhow::Result<()> {
        self.bridge.stop_scanning()
    }

    async fn set_torch(&self, enabled: bool) -> anyhow::Result<()> {
        self.bridge.enable_torch(enabled)
    }

    async fn set_scanner_mode(&self, mode: ScannerMode) -> anyhow::Result<()> {
        self.bridge.set_decode_config(mode.code())
    }
}

/// Connectivity check backed by the bridge.
pub struct BridgeConnectivity {
    bridge: Arc<dyn PreviewBridge>,
}

impl BridgeConnectivity {
    pub fn new(bridge: Arc<dyn PreviewBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Connectivity for BridgeConnectivity {
    async fn has_internet(&self) -> bool {
        self.bridge.network_available()
    }
}
