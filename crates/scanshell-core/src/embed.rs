//! Embedding facade for the platform bindings.
//!
//! FFI layers cannot hold Rust futures or leases across the boundary, so
//! [`EmbeddedSession`] keeps them on the Rust side: display containers are
//! addressed by the platform's container id, the outstanding lease lives in a
//! single slot, and events are polled instead of subscribed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::camera::{display_container, CameraLease, ContainerLayout, DisplayContainer};
use crate::coordinator::SessionLifecycleCoordinator;
use crate::errors::SessionError;
use crate::types::{Bounds, ContainerId, ScannerMode, SessionEvent};

pub struct EmbeddedSession {
    coordinator: SessionLifecycleCoordinator,
    containers: Mutex<HashMap<ContainerId, ContainerLayout>>,
    lease: tokio::sync::Mutex<Option<CameraLease>>,
    events: Mutex<broadcast::Receiver<SessionEvent>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EmbeddedSession {
    pub fn new(coordinator: SessionLifecycleCoordinator) -> Self {
        let events = coordinator.subscribe();
        Self {
            coordinator,
            containers: Mutex::new(HashMap::new()),
            lease: tokio::sync::Mutex::new(None),
            events: Mutex::new(events),
        }
    }

    pub fn coordinator(&self) -> &SessionLifecycleCoordinator {
        &self.coordinator
    }

    // -------------------------------------------------------------------------
    // Containers
    // -------------------------------------------------------------------------

    /// Record layout bounds for a container, registering it if new.
    pub fn report_layout(&self, id: ContainerId, width: f64, height: f64) {
        let mut containers = locked(&self.containers);
        containers
            .entry(id)
            .or_insert_with(|| display_container(id).0)
            .report(Bounds::new(width, height));
    }

    /// Coordinator-side view of a container; registers it with zero bounds if
    /// the layout pass has not reported yet.
    pub fn container(&self, id: ContainerId) -> DisplayContainer {
        let mut containers = locked(&self.containers);
        containers
            .entry(id)
            .or_insert_with(|| display_container(id).0)
            .container()
    }

    /// Drop a container whose view was torn down. Anything still waiting for
    /// its layout gives up.
    pub fn forget_container(&self, id: ContainerId) {
        if locked(&self.containers).remove(&id).is_some() {
            debug!(container = id, "display container removed");
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub async fn initialize(&self, container: ContainerId) -> Result<(), SessionError> {
        let container = self.container(container);
        self.coordinator.initialize(container).await
    }

    pub async fn retry(&self, container: ContainerId) -> Result<(), SessionError> {
        let container = self.container(container);
        self.coordinator.retry(container).await
    }

    pub async fn clear_saved_license(&self) -> Result<(), SessionError> {
        self.coordinator.clear_saved_license().await
    }

    // -------------------------------------------------------------------------
    // Camera
    // -------------------------------------------------------------------------

    /// Lease the camera, optionally moving the preview into `container`.
    /// Returns the lease id.
    pub async fn acquire_camera(&self, container: Option<ContainerId>) -> Result<u64, SessionError> {
        let mut slot = self.lease.lock().await;
        if slot.is_some() {
            warn!("camera acquired twice without being returned");
            return Err(SessionError::ResourceBusy);
        }

        let lease = self.coordinator.get_camera_for_scanning().await?;
        if let Some(id) = container {
            let container = self.container(id);
            if let Err(e) = lease.present_in(&container).await {
                let _ = self.coordinator.return_camera(lease).await;
                return Err(e);
            }
        }

        let id = lease.id();
        *slot = Some(lease);
        Ok(id)
    }

    /// Return the held lease. No-op when nothing is held.
    pub async fn return_camera(&self) -> Result<(), SessionError> {
        let lease = self.lease.lock().await.take();
        match lease {
            Some(lease) => self.coordinator.return_camera(lease).await,
            None => Ok(()),
        }
    }

    pub async fn has_camera(&self) -> bool {
        self.lease.lock().await.is_some()
    }

    pub async fn start_camera(&self) -> Result<(), SessionError> {
        match self.lease.lock().await.as_ref() {
            Some(lease) => lease.start().await,
            None => self.coordinator.start_camera().await,
        }
    }

    pub async fn stop_camera(&self) -> Result<(), SessionError> {
        match self.lease.lock().await.as_ref() {
            Some(lease) => lease.stop().await,
            None => self.coordinator.stop_camera().await,
        }
    }

    pub async fn set_torch(&self, enabled: bool) -> Result<(), SessionError> {
        match self.lease.lock().await.as_ref() {
            Some(lease) => lease.set_torch(enabled).await,
            None => self.coordinator.set_torch(enabled).await,
        }
    }

    pub async fn set_scanner_mode(&self, mode: ScannerMode) -> Result<(), SessionError> {
        match self.lease.lock().await.as_ref() {
            Some(lease) => lease.set_scanner_mode(mode).await,
            None => self.coordinator.camera().set_scanner_mode(mode).await,
        }
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Next pending event, if any. Events missed while lagging are skipped.
    pub fn poll_event(&self) -> Option<SessionEvent> {
        let mut events = locked(&self.events);
        loop {
            match events.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "event poller lagged, dropping old events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
