//! Native SDK boundary.
//!
//! The coordinator never branches on platform: each platform crate supplies a
//! [`NativeCamera`] implementation, and native callbacks come back as
//! [`NativeEvent`]s posted through a weakly registered [`EventSink`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{ScannerMode, Surface};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Ios,
    Other,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android => write!(f, "android"),
            Platform::Ios => write!(f, "ios"),
            Platform::Other => write!(f, "other"),
        }
    }
}

/// Callback from the native layer, delivered to the coordinator's inbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeEvent {
    ScanDecoded(String),
    LicenseSucceeded(String),
    LicenseFailed(String),
}

/// Weak handle onto the coordinator inbox.
///
/// Holding a sink does not keep the coordinator alive; once it is gone,
/// posted events are dropped.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::WeakUnboundedSender<NativeEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: &mpsc::UnboundedSender<NativeEvent>) -> Self {
        Self { tx: tx.downgrade() }
    }

    /// Post an event. Returns false if the coordinator is gone.
    pub fn post(&self, event: NativeEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                debug!(?event, "coordinator inbox closed, dropping native event");
                false
            }
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Native camera/decoding capability, one implementation per platform.
///
/// Implementations marshal each call onto the platform's UI thread. The
/// camera handle serializes calls, so at most one is in flight at a time.
/// Any error returned here is treated as a recoverable camera error, except
/// from `validate_license`, where it fails the validation attempt.
#[async_trait]
pub trait NativeCamera: Send + Sync {
    fn platform(&self) -> Platform;

    /// Register where license and decode callbacks must be posted.
    fn register_events(&self, sink: EventSink);

    /// Construct the native session inside a laid-out container.
    async fn create_session(
        &self,
        license_key: &str,
        mode: ScannerMode,
        surface: Surface,
    ) -> anyhow::Result<()>;

    /// Move the existing preview into another container.
    async fn attach_surface(&self, surface: Surface) -> anyhow::Result<()>;

    /// Remove the preview from its container without destroying the session.
    async fn detach_surface(&self) -> anyhow::Result<()>;

    /// Start a validation round-trip. The result arrives later as
    /// `LicenseSucceeded` or `LicenseFailed`.
    async fn validate_license(&self, license_key: &str) -> anyhow::Result<()>;

    async fn start_session(&self) -> anyhow::Result<()>;

    async fn stop_session(&self) -> anyhow::Result<()>;

    async fn set_torch(&self, enabled: bool) -> anyhow::Result<()>;

    async fn set_scanner_mode(&self, mode: ScannerMode) -> anyhow::Result<()>;
}

/// Pre-flight network check used before an online validation.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn has_internet(&self) -> bool;
}
