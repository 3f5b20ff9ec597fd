//! Camera resource handle and its lease.
//!
//! The handle owns the single long-lived native session. It is created lazily
//! on the first attach and stopped (never destroyed) between leases. At most
//! one screen holds a [`CameraLease`] at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::platform::NativeCamera;
use crate::types::{Bounds, ContainerId, ScannerMode, Surface};

// ============================================================================
// Display Containers
// ============================================================================

/// UI-side half of a display container: the layout pass reports bounds here.
pub struct ContainerLayout {
    id: ContainerId,
    tx: watch::Sender<Bounds>,
}

impl ContainerLayout {
    /// Report new layout bounds.
    pub fn report(&self, bounds: Bounds) {
        self.tx.send_replace(bounds);
    }

    /// Another view of this container for the coordinator.
    pub fn container(&self) -> DisplayContainer {
        DisplayContainer {
            id: self.id,
            bounds: self.tx.subscribe(),
        }
    }
}

/// Coordinator-side view of a display container.
#[derive(Clone)]
pub struct DisplayContainer {
    id: ContainerId,
    bounds: watch::Receiver<Bounds>,
}

impl DisplayContainer {
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Wait until the container has non-zero bounds.
    ///
    /// Returns `None` if the UI side went away before laying out.
    pub async fn ready_bounds(&self) -> Option<Bounds> {
        let mut rx = self.bounds.clone();
        let bounds = rx.wait_for(|b| !b.is_empty()).await.ok()?;
        Some(*bounds)
    }
}

/// Create a display container with zero bounds.
pub fn display_container(id: ContainerId) -> (ContainerLayout, DisplayContainer) {
    let (tx, rx) = watch::channel(Bounds::default());
    (ContainerLayout { id, tx }, DisplayContainer { id, bounds: rx })
}

// ============================================================================
// Camera Resource Handle
// ============================================================================

#[derive(Debug, Default)]
struct CameraState {
    created: bool,
    running: bool,
    attached: Option<ContainerId>,
    mode: ScannerMode,
}

struct HandleInner {
    native: Arc<dyn NativeCamera>,
    /// Held across native calls so they never overlap
    state: Mutex<CameraState>,
    leased: AtomicBool,
    lease_seq: AtomicU64,
}

/// Owner of the single native camera session.
#[derive(Clone)]
pub struct CameraResourceHandle {
    inner: Arc<HandleInner>,
}

impl CameraResourceHandle {
    pub fn new(native: Arc<dyn NativeCamera>, mode: ScannerMode) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                native,
                state: Mutex::new(CameraState {
                    mode,
                    ..CameraState::default()
                }),
                leased: AtomicBool::new(false),
                lease_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Bind the camera to `container`.
    ///
    /// Waits for non-zero layout bounds first. The native session is created
    /// on the first attach; later attaches only move the preview.
    pub async fn attach(
        &self,
        container: &DisplayContainer,
        license_key: &str,
    ) -> Result<Surface, SessionError> {
        let surface = wait_for_surface(container).await?;

        let mut state = self.inner.state.lock().await;
        let result = if state.created {
            self.inner.native.attach_surface(surface).await
        } else {
            self.inner
                .native
                .create_session(license_key, state.mode, surface)
                .await
        };

        match result {
            Ok(()) => {
                if !state.created {
                    info!(container = surface.container_id, "native camera session created");
                }
                state.created = true;
                state.attached = Some(surface.container_id);
                Ok(surface)
            }
            Err(e) => Err(camera_error("attach", e)),
        }
    }

    /// Move an existing session into `container`. Fails with `NotReady` if no
    /// session was ever created.
    pub(crate) async fn reattach(&self, container: &DisplayContainer) -> Result<Surface, SessionError> {
        if !self.inner.state.lock().await.created {
            return Err(SessionError::NotReady);
        }
        let surface = wait_for_surface(container).await?;

        let mut state = self.inner.state.lock().await;
        match self.inner.native.attach_surface(surface).await {
            Ok(()) => {
                state.attached = Some(surface.container_id);
                Ok(surface)
            }
            Err(e) => Err(camera_error("attach", e)),
        }
    }

    /// Unbind from the current container. Safe to call with no attachment.
    pub async fn detach(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.attached.is_none() {
            return Ok(());
        }
        state.attached = None;
        self.inner
            .native
            .detach_surface()
            .await
            .map_err(|e| camera_error("detach", e))
    }

    /// Hand out the single lease.
    pub fn lease(&self) -> Result<CameraLease, SessionError> {
        if self
            .inner
            .leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("camera lease requested while another is outstanding");
            return Err(SessionError::ResourceBusy);
        }

        let id = self.inner.lease_seq.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(lease = id, "camera lease granted");
        Ok(CameraLease {
            id,
            handle: self.clone(),
            returned: false,
        })
    }

    /// Return a lease: stop the session and clear the busy flag.
    ///
    /// The flag is cleared even if stopping fails; the stop error is still
    /// reported.
    pub async fn return_lease(&self, mut lease: CameraLease) -> Result<(), SessionError> {
        if !Arc::ptr_eq(&self.inner, &lease.handle.inner) {
            return Err(SessionError::Camera(
                "lease belongs to a different camera handle".to_string(),
            ));
        }
        lease.returned = true;

        let stopped = self.stop().await;
        self.inner.leased.store(false, Ordering::Release);
        debug!(lease = lease.id, "camera lease returned");
        stopped
    }

    pub fn is_leased(&self) -> bool {
        self.inner.leased.load(Ordering::Acquire)
    }

    pub async fn is_session_created(&self) -> bool {
        self.inner.state.lock().await.created
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    pub async fn attached_container(&self) -> Option<ContainerId> {
        self.inner.state.lock().await.attached
    }

    /// Start scanning. No-op before the session exists.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if !state.created {
            debug!("start requested before session creation, ignoring");
            return Ok(());
        }
        self.inner
            .native
            .start_session()
            .await
            .map_err(|e| camera_error("start", e))?;
        state.running = true;
        Ok(())
    }

    /// Stop scanning. No-op before the session exists.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if !state.created {
            return Ok(());
        }
        // Treat the session as stopped even if the SDK complained
        state.running = false;
        self.inner
            .native
            .stop_session()
            .await
            .map_err(|e| camera_error("stop", e))
    }

    /// Toggle the torch. No-op while no session is running.
    pub async fn set_torch(&self, enabled: bool) -> Result<(), SessionError> {
        let state = self.inner.state.lock().await;
        if !state.running {
            debug!(enabled, "torch change ignored, no active session");
            return Ok(());
        }
        self.inner
            .native
            .set_torch(enabled)
            .await
            .map_err(|e| camera_error("torch", e))
    }

    /// Switch decoder mode; applied on creation if the session does not exist yet.
    pub async fn set_scanner_mode(&self, mode: ScannerMode) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.mode == mode {
            return Ok(());
        }
        if state.created {
            self.inner
                .native
                .set_scanner_mode(mode)
                .await
                .map_err(|e| camera_error("scanner mode", e))?;
        }
        state.mode = mode;
        Ok(())
    }

    pub async fn scanner_mode(&self) -> ScannerMode {
        self.inner.state.lock().await.mode
    }
}

async fn wait_for_surface(container: &DisplayContainer) -> Result<Surface, SessionError> {
    let bounds = container.ready_bounds().await.ok_or_else(|| {
        SessionError::Camera(format!(
            "container {} closed before reporting layout bounds",
            container.id()
        ))
    })?;
    Ok(Surface {
        container_id: container.id(),
        bounds,
    })
}

fn camera_error(op: &str, e: anyhow::Error) -> SessionError {
    warn!(op, error = %e, "native camera call failed");
    SessionError::Camera(format!("{op} failed: {e}"))
}

// ============================================================================
// Camera Lease
// ============================================================================

/// Temporary ownership of the camera by one screen.
///
/// Return it with `return_camera` on every exit path. A lease that is dropped
/// instead stops the session in the background and then frees the camera.
pub struct CameraLease {
    id: u64,
    handle: CameraResourceHandle,
    returned: bool,
}

impl CameraLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Move the preview into the screen's own container.
    pub async fn present_in(&self, container: &DisplayContainer) -> Result<Surface, SessionError> {
        self.handle.reattach(container).await
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.handle.start().await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.handle.stop().await
    }

    pub async fn set_torch(&self, enabled: bool) -> Result<(), SessionError> {
        self.handle.set_torch(enabled).await
    }

    pub async fn set_scanner_mode(&self, mode: ScannerMode) -> Result<(), SessionError> {
        self.handle.set_scanner_mode(mode).await
    }
}

impl std::fmt::Debug for CameraLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraLease").field("id", &self.id).finish()
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        warn!(lease = self.id, "camera lease dropped without being returned");

        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    let _ = handle.stop().await;
                    handle.inner.leased.store(false, Ordering::Release);
                });
            }
            Err(_) => handle.inner.leased.store(false, Ordering::Release),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{NativeCall, NativeOp, SimulatedCamera};
    use crate::platform::Platform;
    use std::time::Duration;

    fn handle_with(sim: &Arc<SimulatedCamera>) -> CameraResourceHandle {
        CameraResourceHandle::new(sim.clone(), ScannerMode::Any)
    }

    #[tokio::test]
    async fn test_attach_waits_for_layout_bounds() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);
        let (layout, container) = display_container(7);

        let attach = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.attach(&container, "key").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sim.calls().is_empty(), "no native call before layout");

        layout.report(Bounds::new(100.0, 100.0));
        let surface = attach.await.unwrap().unwrap();
        assert_eq!(surface.container_id, 7);
        assert_eq!(sim.count(NativeOp::CreateSession), 1);
        assert_eq!(handle.attached_container().await, Some(7));
    }

    #[tokio::test]
    async fn test_second_attach_moves_existing_session() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);
        let (a, container_a) = display_container(1);
        let (b, container_b) = display_container(2);
        a.report(Bounds::new(100.0, 100.0));
        b.report(Bounds::new(390.0, 844.0));

        handle.attach(&container_a, "key").await.unwrap();
        handle.attach(&container_b, "key").await.unwrap();

        assert_eq!(sim.count(NativeOp::CreateSession), 1);
        assert_eq!(sim.count(NativeOp::AttachSurface), 1);
        assert_eq!(handle.attached_container().await, Some(2));
    }

    #[tokio::test]
    async fn test_attach_fails_when_container_goes_away() {
        let sim = SimulatedCamera::shared(Platform::Ios);
        let handle = handle_with(&sim);
        let (layout, container) = display_container(3);
        drop(layout);

        let err = handle.attach(&container, "key").await.unwrap_err();
        assert!(matches!(err, SessionError::Camera(_)));
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);
        handle.detach().await.unwrap();

        let (layout, container) = display_container(1);
        layout.report(Bounds::new(10.0, 10.0));
        handle.attach(&container, "key").await.unwrap();
        handle.detach().await.unwrap();
        handle.detach().await.unwrap();
        assert_eq!(sim.count(NativeOp::DetachSurface), 1);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_returned() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);

        let lease = handle.lease().unwrap();
        assert!(matches!(handle.lease(), Err(SessionError::ResourceBusy)));

        handle.return_lease(lease).await.unwrap();
        let again = handle.lease().unwrap();
        assert!(handle.is_leased());
        handle.return_lease(again).await.unwrap();
        assert!(!handle.is_leased());
    }

    #[tokio::test]
    async fn test_return_lease_stops_but_keeps_session() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);
        let (layout, container) = display_container(1);
        layout.report(Bounds::new(10.0, 10.0));
        handle.attach(&container, "key").await.unwrap();

        let lease = handle.lease().unwrap();
        lease.start().await.unwrap();
        assert!(handle.is_running().await);

        handle.return_lease(lease).await.unwrap();
        assert!(!handle.is_running().await);
        assert!(handle.is_session_created().await);
        assert_eq!(sim.count(NativeOp::StopSession), 1);
    }

    #[tokio::test]
    async fn test_stop_failure_still_frees_lease() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);
        let (layout, container) = display_container(1);
        layout.report(Bounds::new(10.0, 10.0));
        handle.attach(&container, "key").await.unwrap();
        sim.fail_on(NativeOp::StopSession);

        let lease = handle.lease().unwrap();
        let err = handle.return_lease(lease).await.unwrap_err();
        assert!(matches!(err, SessionError::Camera(_)));
        assert!(handle.lease().is_ok());
    }

    #[tokio::test]
    async fn test_torch_is_noop_without_running_session() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);
        handle.set_torch(true).await.unwrap();
        assert_eq!(sim.count(NativeOp::SetTorch), 0);

        let (layout, container) = display_container(1);
        layout.report(Bounds::new(10.0, 10.0));
        handle.attach(&container, "key").await.unwrap();
        handle.start().await.unwrap();
        handle.set_torch(true).await.unwrap();
        assert!(sim.calls().contains(&NativeCall::SetTorch(true)));
    }

    #[tokio::test]
    async fn test_camera_error_leaves_handle_usable() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);
        let (layout, container) = display_container(1);
        layout.report(Bounds::new(10.0, 10.0));

        sim.fail_on(NativeOp::CreateSession);
        assert!(matches!(
            handle.attach(&container, "key").await,
            Err(SessionError::Camera(_))
        ));
        assert!(!handle.is_session_created().await);

        sim.clear_failures();
        handle.attach(&container, "key").await.unwrap();
        assert!(handle.is_session_created().await);
    }

    #[tokio::test]
    async fn test_scanner_mode_applied_at_creation_or_forwarded() {
        let sim = SimulatedCamera::shared(Platform::Ios);
        let handle = handle_with(&sim);
        handle.set_scanner_mode(ScannerMode::QrCode).await.unwrap();
        assert_eq!(sim.count(NativeOp::SetScannerMode), 0);

        let (layout, container) = display_container(1);
        layout.report(Bounds::new(10.0, 10.0));
        handle.attach(&container, "key").await.unwrap();
        assert!(sim.calls().iter().any(|c| matches!(
            c,
            NativeCall::CreateSession { mode: ScannerMode::QrCode, .. }
        )));

        handle.set_scanner_mode(ScannerMode::Barcode).await.unwrap();
        assert!(sim.calls().contains(&NativeCall::SetScannerMode(ScannerMode::Barcode)));
    }

    #[tokio::test]
    async fn test_dropped_lease_is_released_in_background() {
        let sim = SimulatedCamera::shared(Platform::Android);
        let handle = handle_with(&sim);

        drop(handle.lease().unwrap());
        for _ in 0..50 {
            if !handle.is_leased() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.lease().is_ok());
    }
}
