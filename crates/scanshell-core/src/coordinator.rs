//! Session lifecycle coordinator.
//!
//! Composes the license store, the validation gate, and the camera handle
//! into one state machine:
//!
//! ```text
//! Idle --initialize--> Validating --success--> Ready
//!                          |
//!                          +--failure--> Failed --retry--> Validating
//! Ready --clear_saved_license--> Idle
//! ```
//!
//! Concurrent `initialize` calls collapse onto one in-flight operation and all
//! observe its outcome. Once started, an initialization runs to completion
//! even if the screen that asked for it goes away.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::camera::{CameraLease, CameraResourceHandle, DisplayContainer};
use crate::config::{ConfigError, ScanConfig};
use crate::errors::SessionError;
use crate::gate::{shared_outcome, OutcomeSlot, SharedOutcome, ValidationGate};
use crate::platform::{Connectivity, EventSink, NativeCamera, NativeEvent, Platform};
use crate::scan::DecodeDebouncer;
use crate::store::LicenseStore;
use crate::types::{
    ReadinessFlags, ScannerMode, SessionEvent, SessionState, Validation, ValidationState,
};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Construction parameters for [`SessionLifecycleCoordinator`].
#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    /// License identifier of the current platform
    pub license_key: String,
    /// Decoder mode used when the native session is created
    pub scanner_mode: ScannerMode,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
}

impl CoordinatorOptions {
    pub fn new(license_key: impl Into<String>) -> Self {
        Self {
            license_key: license_key.into(),
            scanner_mode: ScannerMode::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_scanner_mode(mut self, mode: ScannerMode) -> Self {
        self.scanner_mode = mode;
        self
    }

    /// Resolve options for `platform` from a validated configuration.
    pub fn from_config(config: &ScanConfig, platform: Platform) -> Result<Self, ConfigError> {
        Ok(Self::new(config.license_key_for(platform)?).with_scanner_mode(config.scanner.mode))
    }
}

struct CoordinatorState {
    session: SessionState,
    flags: ReadinessFlags,
    /// Next initialization skips the silent path
    force_network: bool,
    inflight: Option<SharedOutcome<Result<(), SessionError>>>,
    last_error: Option<String>,
}

struct CoordinatorInner {
    license_key: String,
    platform: Platform,
    camera: CameraResourceHandle,
    gate: ValidationGate,
    store: Arc<dyn LicenseStore>,
    events: broadcast::Sender<SessionEvent>,
    decoder: DecodeDebouncer,
    state: Mutex<CoordinatorState>,
    /// Keeps the inbox open; native code only holds weak senders
    _inbox: mpsc::UnboundedSender<NativeEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CoordinatorInner {
    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide owner of the scanner session.
#[derive(Clone)]
pub struct SessionLifecycleCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SessionLifecycleCoordinator {
    /// Create the coordinator and register its inbox with the native layer.
    ///
    /// Must be called from within a Tokio runtime: the inbox pump is spawned
    /// here.
    pub fn new(
        native: Arc<dyn NativeCamera>,
        store: Arc<dyn LicenseStore>,
        connectivity: Arc<dyn Connectivity>,
        options: CoordinatorOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        native.register_events(EventSink::new(&inbox_tx));

        let platform = native.platform();
        let camera = CameraResourceHandle::new(native.clone(), options.scanner_mode);
        let gate = ValidationGate::new(native, store.clone(), connectivity, events.clone());

        let inner = Arc::new(CoordinatorInner {
            license_key: options.license_key,
            platform,
            camera,
            gate,
            store,
            events,
            decoder: DecodeDebouncer::new(),
            state: Mutex::new(CoordinatorState {
                session: SessionState::Idle,
                flags: ReadinessFlags::default(),
                force_network: false,
                inflight: None,
                last_error: None,
            }),
            _inbox: inbox_tx,
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(run_inbox(Arc::downgrade(&inner), inbox_rx));
        *inner.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);

        info!(%platform, "scanner session coordinator created");
        Self { inner }
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    /// Bring the scanner to `Ready`, using `container` for the native session.
    ///
    /// Returns immediately when already ready. A call made while another
    /// initialization is in flight waits for that one instead of starting a
    /// second.
    pub async fn initialize(&self, container: DisplayContainer) -> Result<(), SessionError> {
        let outcome = {
            let mut state = self.inner.state();
            if state.session == SessionState::Ready {
                debug!("scanner already initialized");
                return Ok(());
            }

            match state.inflight.clone() {
                Some(outcome) => {
                    debug!("initialization in flight, waiting for its result");
                    outcome
                }
                None => {
                    let (slot, outcome) = shared_outcome();
                    let force = state.force_network;
                    state.session = SessionState::Validating;
                    state.inflight = Some(outcome.clone());

                    let this = self.clone();
                    tokio::spawn(async move {
                        let result = this.run_initialize(container, force).await;
                        this.settle(slot, result);
                    });
                    outcome
                }
            }
        };

        match outcome.wait().await {
            Some(result) => result,
            None => Err(self.forget_abandoned(&outcome)),
        }
    }

    /// Re-run initialization after a failure, always validating online.
    pub async fn retry(&self, container: DisplayContainer) -> Result<(), SessionError> {
        {
            let mut state = self.inner.state();
            if matches!(state.session, SessionState::Failed | SessionState::Idle) {
                state.force_network = true;
            }
        }
        self.initialize(container).await
    }

    async fn run_initialize(
        &self,
        container: DisplayContainer,
        force: bool,
    ) -> Result<Validation, SessionError> {
        info!(
            platform = %self.inner.platform,
            container = container.id(),
            force,
            "initializing scanner session"
        );
        // Creating the native session already talks to the licensing service
        self.inner
            .gate
            .preflight(&self.inner.license_key, force)
            .await?;
        self.inner
            .camera
            .attach(&container, &self.inner.license_key)
            .await?;
        self.inner.gate.request(&self.inner.license_key, force).await
    }

    fn settle(
        &self,
        slot: OutcomeSlot<Result<(), SessionError>>,
        result: Result<Validation, SessionError>,
    ) {
        let outcome = {
            let mut state = self.inner.state();
            state.inflight = None;
            match result {
                Ok(validation) => {
                    state.session = SessionState::Ready;
                    state.flags = ReadinessFlags::ready();
                    state.force_network = false;
                    state.last_error = None;
                    info!(path = ?validation.path, "scanner session ready");
                    Ok(())
                }
                Err(e) => {
                    state.session = SessionState::Failed;
                    state.flags = ReadinessFlags::default();
                    if e.is_validation_failure() {
                        state.force_network = true;
                    }
                    state.last_error = Some(e.reason());
                    warn!(error = %e, "scanner session initialization failed");
                    Err(e)
                }
            }
        };

        match &outcome {
            Ok(()) => {
                let _ = self.inner.events.send(SessionEvent::CameraReady);
            }
            // The gate has already announced validation failures
            Err(e) if !e.is_validation_failure() => {
                let _ = self
                    .inner
                    .events
                    .send(SessionEvent::LicenseValidationFailed(e.reason()));
            }
            Err(_) => {}
        }
        slot.resolve(outcome);
    }

    /// Clear an in-flight initialization whose task died without settling.
    fn forget_abandoned(&self, outcome: &SharedOutcome<Result<(), SessionError>>) -> SessionError {
        let err = SessionError::ValidationFailure(
            "initialization was abandoned before completing".to_string(),
        );
        let mut state = self.inner.state();
        if state
            .inflight
            .as_ref()
            .is_some_and(|inflight| inflight.same_outcome(outcome))
        {
            warn!("initialization ended without a result, marking failed");
            state.inflight = None;
            state.session = SessionState::Failed;
            state.flags = ReadinessFlags::default();
            state.force_network = true;
            state.last_error = Some(err.reason());
        }
        err
    }

    /// Forget the saved license and return to `Idle`.
    ///
    /// The next initialization validates online. An initialization already in
    /// flight still completes and its outcome stands.
    pub async fn clear_saved_license(&self) -> Result<(), SessionError> {
        let cleared = self.inner.store.clear().await;
        self.inner.gate.reset().await;
        {
            let mut state = self.inner.state();
            state.flags = ReadinessFlags::default();
            state.force_network = true;
            state.last_error = None;
            if state.inflight.is_none() {
                state.session = SessionState::Idle;
            }
        }
        info!("saved license cleared");
        cleared.map_err(SessionError::from)
    }

    // -------------------------------------------------------------------------
    // Camera
    // -------------------------------------------------------------------------

    /// Lend the camera to a screen. Only valid once `Ready`.
    pub async fn get_camera_for_scanning(&self) -> Result<CameraLease, SessionError> {
        if !self.is_fully_initialized() {
            warn!("camera requested before the scanner was initialized");
            return Err(SessionError::NotReady);
        }

        let lease = self.inner.camera.lease()?;
        if let Err(e) = lease.set_torch(false).await {
            debug!(error = %e, "could not switch torch off for new lease");
        }
        info!(lease = lease.id(), "camera lent to screen");
        Ok(lease)
    }

    /// Take the camera back from a screen; stops the session.
    pub async fn return_camera(&self, lease: CameraLease) -> Result<(), SessionError> {
        let id = lease.id();
        let result = self.inner.camera.return_lease(lease).await;
        info!(lease = id, "camera returned");
        result
    }

    pub async fn start_camera(&self) -> Result<(), SessionError> {
        self.inner.camera.start().await
    }

    pub async fn stop_camera(&self) -> Result<(), SessionError> {
        self.inner.camera.stop().await
    }

    pub async fn set_torch(&self, enabled: bool) -> Result<(), SessionError> {
        self.inner.camera.set_torch(enabled).await
    }

    pub fn camera(&self) -> &CameraResourceHandle {
        &self.inner.camera
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn license_key(&self) -> &str {
        &self.inner.license_key
    }

    pub fn platform(&self) -> Platform {
        self.inner.platform
    }

    pub fn state(&self) -> SessionState {
        self.inner.state().session
    }

    pub fn readiness(&self) -> ReadinessFlags {
        self.inner.state().flags
    }

    pub fn is_fully_initialized(&self) -> bool {
        let state = self.inner.state();
        state.session == SessionState::Ready && state.flags.fully_initialized()
    }

    pub fn is_validation_in_progress(&self) -> bool {
        self.inner.state().inflight.is_some()
    }

    /// Reason of the most recent failed initialization.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state().last_error.clone()
    }

    /// True when no validated license is saved.
    pub async fn is_first_time_use(&self) -> bool {
        match self.inner.store.load().await {
            Ok(Some(record)) => !record.validated,
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "could not read saved license");
                true
            }
        }
    }

    pub async fn validation_state(&self) -> ValidationState {
        if self.state() == SessionState::Failed {
            return ValidationState::Failed;
        }
        self.inner.gate.state().await
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Shared processing flag for presenting decode results.
    pub fn decoder(&self) -> &DecodeDebouncer {
        &self.inner.decoder
    }

    /// Stop the inbox pump and release the camera surface.
    pub async fn shutdown(&self) {
        let pump = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Err(e) = self.inner.camera.stop().await {
            debug!(error = %e, "stop during shutdown failed");
        }
        if let Err(e) = self.inner.camera.detach().await {
            debug!(error = %e, "detach during shutdown failed");
        }
        info!("scanner session coordinator shut down");
    }
}

/// Route native callbacks: license answers to the gate, decodes to screens.
async fn run_inbox(inner: Weak<CoordinatorInner>, mut inbox: mpsc::UnboundedReceiver<NativeEvent>) {
    while let Some(event) = inbox.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            NativeEvent::LicenseSucceeded(payload) => {
                inner.gate.complete(Ok(payload)).await;
            }
            NativeEvent::LicenseFailed(reason) => {
                inner.gate.complete(Err(reason)).await;
            }
            NativeEvent::ScanDecoded(text) => {
                debug!(len = text.len(), "decode result received");
                let _ = inner.events.send(SessionEvent::ScanDecoded(text));
            }
        }
    }
    debug!("coordinator inbox closed");
}
