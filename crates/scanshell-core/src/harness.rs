//! In-process stand-ins for the native SDK and the network check.
//!
//! Used by this crate's tests, the integration tests, and the demo binary.
//! [`SimulatedCamera`] records every native call and answers validation
//! requests according to a [`ValidationScript`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::bail;
use async_trait::async_trait;

use crate::platform::{Connectivity, EventSink, NativeCamera, NativeEvent, Platform};
use crate::types::{ContainerId, ScannerMode, Surface};

/// A recorded native call.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeCall {
    CreateSession {
        license_key: String,
        mode: ScannerMode,
        container_id: ContainerId,
    },
    AttachSurface(ContainerId),
    DetachSurface,
    ValidateLicense(String),
    StartSession,
    StopSession,
    SetTorch(bool),
    SetScannerMode(ScannerMode),
}

/// Kind of a [`NativeCall`], for counting and failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeOp {
    CreateSession,
    AttachSurface,
    DetachSurface,
    ValidateLicense,
    StartSession,
    StopSession,
    SetTorch,
    SetScannerMode,
}

impl NativeCall {
    pub fn op(&self) -> NativeOp {
        match self {
            NativeCall::CreateSession { .. } => NativeOp::CreateSession,
            NativeCall::AttachSurface(_) => NativeOp::AttachSurface,
            NativeCall::DetachSurface => NativeOp::DetachSurface,
            NativeCall::ValidateLicense(_) => NativeOp::ValidateLicense,
            NativeCall::StartSession => NativeOp::StartSession,
            NativeCall::StopSession => NativeOp::StopSession,
            NativeCall::SetTorch(_) => NativeOp::SetTorch,
            NativeCall::SetScannerMode(_) => NativeOp::SetScannerMode,
        }
    }
}

/// How the simulated SDK answers `validate_license`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationScript {
    /// Post `LicenseSucceeded` with this payload
    Accept(String),
    /// Post `LicenseFailed` with this reason
    Reject(String),
    /// Post nothing; the test answers through [`SimulatedCamera::emit`]
    Manual,
}

impl Default for ValidationScript {
    fn default() -> Self {
        ValidationScript::Accept("ok".to_string())
    }
}

#[derive(Default)]
struct SimState {
    calls: Vec<NativeCall>,
    failing: HashSet<NativeOp>,
    script: ValidationScript,
    sink: Option<EventSink>,
}

/// Scriptable [`NativeCamera`] that never touches real hardware.
pub struct SimulatedCamera {
    platform: Platform,
    state: Mutex<SimState>,
}

impl SimulatedCamera {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn shared(platform: Platform) -> Arc<Self> {
        Arc::new(Self::new(platform))
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_script(&self, script: ValidationScript) {
        self.state().script = script;
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail_on(&self, op: NativeOp) {
        self.state().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: NativeOp) -> usize {
        self.state().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Post an event as if the SDK fired it. False if nothing is listening.
    pub fn emit(&self, event: NativeEvent) -> bool {
        let sink = self.state().sink.clone();
        sink.map(|sink| sink.post(event)).unwrap_or(false)
    }

    fn record(&self, call: NativeCall) -> anyhow::Result<()> {
        let op = call.op();
        let mut state = self.state();
        state.calls.push(call);
        if state.failing.contains(&op) {
            bail!("simulated {op:?} failure");
        }
        Ok(())
    }
}

#[async_trait]
impl NativeCamera for SimulatedCamera {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn register_events(&self, sink: EventSink) {
        self.state().sink = Some(sink);
    }

    async fn create_session(
        &self,
        license_key: &str,
        mode: ScannerMode,
        surface: Surface,
    ) -> anyhow::Result<()> {
        self.record(NativeCall::CreateSession {
            license_key: license_key.to_string(),
            mode,
            container_id: surface.container_id,
        })
    }

    async fn attach_surface(&self, surface: Surface) -> anyhow::Result<()> {
        self.record(NativeCall::AttachSurface(surface.container_id))
    }

    async fn detach_surface(&self) -> anyhow::Result<()> {
        self.record(NativeCall::DetachSurface)
    }

    async fn validate_license(&self, license_key: &str) -> anyhow::Result<()> {
        self.record(NativeCall::ValidateLicense(license_key.to_string()))?;
        let answer = match self.state().script.clone() {
            ValidationScript::Accept(payload) => NativeEvent::LicenseSucceeded(payload),
            ValidationScript::Reject(reason) => NativeEvent::LicenseFailed(reason),
            ValidationScript::Manual => return Ok(()),
        };
        self.emit(answer);
        Ok(())
    }

    async fn start_session(&self) -> anyhow::Result<()> {
        self.record(NativeCall::StartSession)
    }

    async fn stop_session(&self) -> anyhow::Result<()> {
        self.record(NativeCall::StopSession)
    }

    async fn set_torch(&self, enabled: bool) -> anyhow::Result<()> {
        self.record(NativeCall::SetTorch(enabled))
    }

    async fn set_scanner_mode(&self, mode: ScannerMode) -> anyhow::Result<()> {
        self.record(NativeCall::SetScannerMode(mode))
    }
}

/// Connectivity check with a switchable answer.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn has_internet(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}
