//! License validation gate.
//!
//! At most one validation round-trip is outstanding at any time. Concurrent
//! requests attach to the pending outcome instead of contacting the SDK again.
//! A saved record that matches the requested identifier short-circuits the
//! round-trip entirely (the silent path).

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::errors::{SessionError, NO_CONNECTIVITY_MESSAGE};
use crate::platform::{Connectivity, NativeCamera};
use crate::store::LicenseStore;
use crate::types::{LicenseRecord, SessionEvent, Validation, ValidationState};

/// Outcome of a validation request.
pub type ValidationResult = Result<Validation, SessionError>;

// ============================================================================
// Single-assignment outcome
// ============================================================================

/// Write side of a shared outcome. Resolving consumes it.
pub(crate) struct OutcomeSlot<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> OutcomeSlot<T> {
    pub(crate) fn resolve(self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

/// Read side of a shared outcome; every clone observes the same value.
#[derive(Clone)]
pub(crate) struct SharedOutcome<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> SharedOutcome<T> {
    /// Wait for the value. `None` if the slot was dropped unresolved.
    pub(crate) async fn wait(&self) -> Option<T> {
        let mut rx = self.rx.clone();
        let value = rx.wait_for(Option::is_some).await.ok()?;
        value.clone()
    }

    pub(crate) fn same_outcome(&self, other: &Self) -> bool {
        self.rx.same_channel(&other.rx)
    }
}

pub(crate) fn shared_outcome<T>() -> (OutcomeSlot<T>, SharedOutcome<T>) {
    let (tx, rx) = watch::channel(None);
    (OutcomeSlot { tx }, SharedOutcome { rx })
}

// ============================================================================
// Validation Gate
// ============================================================================

struct GateState {
    validation: ValidationState,
    pending: Option<SharedOutcome<ValidationResult>>,
    /// Completed by the inbox pump when the SDK answers
    reply: Option<oneshot::Sender<Result<String, String>>>,
}

struct GateInner {
    native: Arc<dyn NativeCamera>,
    store: Arc<dyn LicenseStore>,
    connectivity: Arc<dyn Connectivity>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<GateState>,
}

/// Serializes license validation into a single outstanding attempt.
#[derive(Clone)]
pub struct ValidationGate {
    inner: Arc<GateInner>,
}

impl ValidationGate {
    pub fn new(
        native: Arc<dyn NativeCamera>,
        store: Arc<dyn LicenseStore>,
        connectivity: Arc<dyn Connectivity>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                native,
                store,
                connectivity,
                events,
                state: Mutex::new(GateState {
                    validation: ValidationState::Unvalidated,
                    pending: None,
                    reply: None,
                }),
            }),
        }
    }

    /// Validate `identifier`.
    ///
    /// # Arguments
    /// * `identifier` - license identifier of the current platform
    /// * `force` - skip the silent path even if a matching record is saved
    ///
    /// # Returns
    /// * `Ok(Validation)` with `ValidationPath::Silent` when the saved record matched
    /// * `Ok(Validation)` with `ValidationPath::Network` after an SDK round-trip
    /// * `Err(SessionError::NoConnectivity | SessionError::ValidationFailure)` otherwise
    ///
    /// A round-trip, once started, runs to completion even if every caller
    /// stops waiting.
    pub async fn request(&self, identifier: &str, force: bool) -> ValidationResult {
        let outcome = {
            let mut state = self.inner.state.lock().await;

            if let Some(pending) = state.pending.clone() {
                debug!("validation already in flight, attaching to pending result");
                pending
            } else {
                if !force && self.saved_record_matches(identifier).await {
                    info!("saved license matches, skipping online validation");
                    state.validation = ValidationState::Validated;
                    return Ok(Validation::silent());
                }

                let (slot, outcome) = shared_outcome();
                let (reply_tx, reply_rx) = oneshot::channel();
                state.pending = Some(outcome.clone());
                state.reply = Some(reply_tx);
                state.validation = ValidationState::Validating;

                let gate = self.clone();
                let identifier = identifier.to_string();
                tokio::spawn(async move {
                    let result = gate.run_round_trip(&identifier, reply_rx).await;
                    gate.finish(slot, result).await;
                });
                outcome
            }
        };

        match outcome.wait().await {
            Some(result) => result,
            None => {
                self.forget_abandoned(&outcome).await;
                Err(SessionError::ValidationFailure(
                    "validation was abandoned before completing".to_string(),
                ))
            }
        }
    }

    /// Connectivity check ahead of anything that reaches the SDK.
    ///
    /// Passes when the silent path applies or a round-trip is already
    /// pending. When offline, the failure is reported the same way a failed
    /// round-trip is.
    pub async fn preflight(&self, identifier: &str, force: bool) -> Result<(), SessionError> {
        if self.is_in_flight().await {
            return Ok(());
        }
        if !force && self.saved_record_matches(identifier).await {
            return Ok(());
        }
        if self.inner.connectivity.has_internet().await {
            return Ok(());
        }

        let err = SessionError::NoConnectivity(NO_CONNECTIVITY_MESSAGE.to_string());
        self.report_failure(&err).await;
        self.inner.state.lock().await.validation = ValidationState::Unvalidated;
        Err(err)
    }

    /// Deliver the SDK's answer for the outstanding round-trip.
    ///
    /// Returns false when no round-trip is waiting (unsolicited callback).
    pub async fn complete(&self, answer: Result<String, String>) -> bool {
        let reply = self.inner.state.lock().await.reply.take();
        match reply {
            Some(tx) => tx.send(answer).is_ok(),
            None => {
                debug!(?answer, "license callback with no validation outstanding, ignoring");
                false
            }
        }
    }

    /// Return to `Unvalidated` unless a round-trip is outstanding.
    pub async fn reset(&self) {
        let mut state = self.inner.state.lock().await;
        if state.pending.is_none() {
            state.validation = ValidationState::Unvalidated;
        }
    }

    pub async fn state(&self) -> ValidationState {
        self.inner.state.lock().await.validation
    }

    pub async fn is_in_flight(&self) -> bool {
        self.inner.state.lock().await.pending.is_some()
    }

    async fn saved_record_matches(&self, identifier: &str) -> bool {
        match self.inner.store.load().await {
            Ok(Some(record)) if record.matches(identifier) => true,
            Ok(Some(record)) if record.validated => {
                info!(
                    saved = %record.license_identifier,
                    "license identifier changed, validating online"
                );
                false
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "could not read saved license, validating online");
                false
            }
        }
    }

    async fn run_round_trip(
        &self,
        identifier: &str,
        reply: oneshot::Receiver<Result<String, String>>,
    ) -> ValidationResult {
        if !self.inner.connectivity.has_internet().await {
            return Err(SessionError::NoConnectivity(NO_CONNECTIVITY_MESSAGE.to_string()));
        }

        info!("validating license with the SDK");
        if let Err(e) = self.inner.native.validate_license(identifier).await {
            return Err(SessionError::ValidationFailure(e.to_string()));
        }

        match reply.await {
            Ok(Ok(payload)) => {
                if let Err(e) = self
                    .inner
                    .store
                    .save(LicenseRecord::validated(identifier))
                    .await
                {
                    warn!(error = %e, "license validated but could not be saved");
                }
                Ok(Validation::network(payload))
            }
            Ok(Err(reason)) => Err(SessionError::ValidationFailure(reason)),
            Err(_) => Err(SessionError::ValidationFailure(
                "license validation callback was dropped".to_string(),
            )),
        }
    }

    async fn finish(&self, slot: OutcomeSlot<ValidationResult>, result: ValidationResult) {
        match &result {
            Ok(validation) => {
                info!("license validated");
                let payload = validation.payload.clone().unwrap_or_default();
                let _ = self.inner.events.send(SessionEvent::LicenseValidated(payload));
            }
            Err(e) => self.report_failure(e).await,
        }

        {
            let mut state = self.inner.state.lock().await;
            state.validation = if result.is_ok() {
                ValidationState::Validated
            } else {
                ValidationState::Unvalidated
            };
            state.pending = None;
            state.reply = None;
        }

        slot.resolve(result);
    }

    async fn report_failure(&self, e: &SessionError) {
        warn!(error = %e, "license validation failed");
        if let Err(clear_err) = self.inner.store.clear().await {
            warn!(error = %clear_err, "could not clear saved license after failure");
        }
        let _ = self
            .inner
            .events
            .send(SessionEvent::LicenseValidationFailed(e.reason()));
    }

    /// Drop a pending outcome whose round-trip task died without resolving it.
    async fn forget_abandoned(&self, outcome: &SharedOutcome<ValidationResult>) {
        let mut state = self.inner.state.lock().await;
        if state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.same_outcome(outcome))
        {
            warn!("validation round-trip ended without a result, clearing it");
            state.pending = None;
            state.reply = None;
            state.validation = ValidationState::Unvalidated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{NativeOp, SimulatedCamera, StaticConnectivity, ValidationScript};
    use crate::platform::{EventSink, NativeCamera, NativeEvent, Platform};
    use crate::store::InMemoryLicenseStore;
    use crate::types::ValidationPath;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Gate wired to a simulated camera whose callbacks are pumped into `complete`.
    fn gate_with(
        sim: &Arc<SimulatedCamera>,
        store: &InMemoryLicenseStore,
        online: bool,
    ) -> (ValidationGate, broadcast::Receiver<SessionEvent>, mpsc::UnboundedSender<NativeEvent>) {
        let (events, events_rx) = broadcast::channel(16);
        let gate = ValidationGate::new(
            sim.clone(),
            Arc::new(store.clone()),
            Arc::new(StaticConnectivity::new(online)),
            events,
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        sim.register_events(EventSink::new(&tx));
        let pump_gate = gate.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    NativeEvent::LicenseSucceeded(p) => {
                        pump_gate.complete(Ok(p)).await;
                    }
                    NativeEvent::LicenseFailed(r) => {
                        pump_gate.complete(Err(r)).await;
                    }
                    NativeEvent::ScanDecoded(_) => {}
                }
            }
        });
        (gate, events_rx, tx)
    }

    #[tokio::test]
    async fn test_network_success_persists_record_and_fires_event() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::new();
        let (gate, mut events, _tx) = gate_with(&sim, &store, true);

        let validation = gate.request("key-a", false).await.unwrap();
        assert_eq!(validation.path, ValidationPath::Network);
        assert_eq!(validation.payload.as_deref(), Some("ok"));
        assert_eq!(store.snapshot().await, Some(LicenseRecord::validated("key-a")));
        assert_eq!(gate.state().await, ValidationState::Validated);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LicenseValidated("ok".into())
        );
    }

    #[tokio::test]
    async fn test_silent_path_skips_sdk_and_events() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::with_record(LicenseRecord::validated("key-a"));
        let (gate, mut events, _tx) = gate_with(&sim, &store, false);

        let validation = gate.request("key-a", false).await.unwrap();
        assert_eq!(validation.path, ValidationPath::Silent);
        assert_eq!(sim.count(NativeOp::ValidateLicense), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_changed_identifier_forces_round_trip_and_overwrites() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::with_record(LicenseRecord::validated("old-key"));
        let (gate, _events, _tx) = gate_with(&sim, &store, true);

        let validation = gate.request("new-key", false).await.unwrap();
        assert_eq!(validation.path, ValidationPath::Network);
        assert_eq!(sim.count(NativeOp::ValidateLicense), 1);
        assert_eq!(store.snapshot().await, Some(LicenseRecord::validated("new-key")));
    }

    #[tokio::test]
    async fn test_forced_request_ignores_matching_record() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::with_record(LicenseRecord::validated("key-a"));
        let (gate, _events, _tx) = gate_with(&sim, &store, true);

        gate.request("key-a", true).await.unwrap();
        assert_eq!(sim.count(NativeOp::ValidateLicense), 1);
    }

    #[tokio::test]
    async fn test_failure_clears_record_and_fires_one_event() {
        let sim = SimulatedCamera::shared(Platform::Android);
        sim.set_script(ValidationScript::Reject("license revoked".into()));
        let store = InMemoryLicenseStore::with_record(LicenseRecord::validated("old-key"));
        let (gate, mut events, _tx) = gate_with(&sim, &store, true);

        let err = gate.request("new-key", false).await.unwrap_err();
        assert_eq!(err, SessionError::ValidationFailure("license revoked".into()));
        assert_eq!(store.snapshot().await, None);
        assert_eq!(gate.state().await, ValidationState::Unvalidated);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LicenseValidationFailed("license revoked".into())
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_connectivity_fails_before_sdk() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::new();
        let (gate, mut events, _tx) = gate_with(&sim, &store, false);

        let err = gate.request("key-a", false).await.unwrap_err();
        assert!(matches!(err, SessionError::NoConnectivity(_)));
        assert_eq!(sim.count(NativeOp::ValidateLicense), 0);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::LicenseValidationFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_round_trip() {
        let sim = SimulatedCamera::shared(Platform::Android);
        sim.set_script(ValidationScript::Manual);
        let store = InMemoryLicenseStore::new();
        let (gate, _events, _tx) = gate_with(&sim, &store, true);

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.request("key-a", false).await })
            })
            .collect();

        while sim.count(NativeOp::ValidateLicense) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(gate.is_in_flight().await);
        assert!(sim.emit(NativeEvent::LicenseSucceeded("ok".into())));

        for waiter in waiters {
            let validation = waiter.await.unwrap().unwrap();
            assert_eq!(validation.payload.as_deref(), Some("ok"));
        }
        assert_eq!(sim.count(NativeOp::ValidateLicense), 1);
    }

    #[tokio::test]
    async fn test_round_trip_survives_caller_cancellation() {
        let sim = SimulatedCamera::shared(Platform::Android);
        sim.set_script(ValidationScript::Manual);
        let store = InMemoryLicenseStore::new();
        let (gate, mut events, _tx) = gate_with(&sim, &store, true);

        let caller = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request("key-a", false).await })
        };
        while sim.count(NativeOp::ValidateLicense) == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();

        sim.emit(NativeEvent::LicenseSucceeded("ok".into()));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LicenseValidated("ok".into())
        );
        assert_eq!(store.snapshot().await, Some(LicenseRecord::validated("key-a")));
    }

    #[tokio::test]
    async fn test_unsolicited_callback_is_ignored() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::new();
        let (gate, _events, _tx) = gate_with(&sim, &store, true);

        assert!(!gate.complete(Ok("late".into())).await);
        assert_eq!(gate.state().await, ValidationState::Unvalidated);
    }

    #[tokio::test]
    async fn test_preflight_offline_reports_failure_without_sdk() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::new();
        let (gate, mut events, _tx) = gate_with(&sim, &store, false);

        let err = gate.preflight("key-a", false).await.unwrap_err();
        assert!(matches!(err, SessionError::NoConnectivity(_)));
        assert!(sim.calls().is_empty());
        assert_eq!(gate.state().await, ValidationState::Unvalidated);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::LicenseValidationFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_preflight_passes_silent_path_offline() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let store = InMemoryLicenseStore::with_record(LicenseRecord::validated("key-a"));
        let (gate, mut events, _tx) = gate_with(&sim, &store, false);

        gate.preflight("key-a", false).await.unwrap();
        assert!(gate.preflight("key-a", true).await.is_err());
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::LicenseValidationFailed(_)
        ));
    }

    /// Native layer whose license call panics inside the round-trip task.
    struct PanickingValidator {
        validations: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl NativeCamera for PanickingValidator {
        fn platform(&self) -> Platform {
            Platform::Android
        }

        fn register_events(&self, _sink: EventSink) {}

        async fn create_session(
            &self,
            _license_key: &str,
            _mode: crate::types::ScannerMode,
            _surface: crate::types::Surface,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn attach_surface(&self, _surface: crate::types::Surface) -> anyhow::Result<()> {
            Ok(())
        }

        async fn detach_surface(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn validate_license(&self, _license_key: &str) -> anyhow::Result<()> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            panic!("SDK crashed during validation");
        }

        async fn start_session(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop_session(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_torch(&self, _enabled: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_scanner_mode(&self, _mode: crate::types::ScannerMode) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dead_round_trip_does_not_block_later_requests() {
        let native = Arc::new(PanickingValidator {
            validations: AtomicUsize::new(0),
        });
        let (events, _events_rx) = broadcast::channel(16);
        let gate = ValidationGate::new(
            native.clone(),
            Arc::new(InMemoryLicenseStore::new()),
            Arc::new(StaticConnectivity::new(true)),
            events,
        );

        let first = gate.request("key-a", false).await.unwrap_err();
        assert!(matches!(first, SessionError::ValidationFailure(_)));
        assert!(!gate.is_in_flight().await);
        assert_eq!(gate.state().await, ValidationState::Unvalidated);

        // A fresh round-trip is started rather than waiting on the dead one
        assert!(gate.request("key-a", false).await.is_err());
        assert_eq!(native.validations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_outcome_reports_abandoned_slot() {
        let (slot, outcome) = shared_outcome::<u32>();
        drop(slot);
        assert_eq!(outcome.wait().await, None);

        let (slot, outcome) = shared_outcome::<u32>();
        let other = outcome.clone();
        slot.resolve(7);
        assert_eq!(outcome.wait().await, Some(7));
        assert_eq!(other.wait().await, Some(7));
    }
}
