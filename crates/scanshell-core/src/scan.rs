//! Decode result de-duplication.
//!
//! The native layer fires one decode event per frame that contains a code, so
//! a code held in front of the camera produces a burst of identical results.
//! Screens take a [`DecodeTicket`] before presenting a result; while one is
//! held, further results are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single in-flight processing flag shared by a screen's decode handlers.
#[derive(Clone, Debug, Default)]
pub struct DecodeDebouncer {
    busy: Arc<AtomicBool>,
}

impl DecodeDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the processing slot, or `None` if a result is being presented.
    pub fn try_begin(&self) -> Option<DecodeTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DecodeTicket {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the processing slot when dropped.
#[derive(Debug)]
pub struct DecodeTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for DecodeTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_one_ticket_at_a_time() {
        let debouncer = DecodeDebouncer::new();
        let ticket = debouncer.try_begin().expect("first ticket");
        assert!(debouncer.is_busy());
        assert!(debouncer.try_begin().is_none());

        drop(ticket);
        assert!(!debouncer.is_busy());
        assert!(debouncer.try_begin().is_some());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let debouncer = DecodeDebouncer::new();
        let other = debouncer.clone();
        let _ticket = debouncer.try_begin().unwrap();
        assert!(other.try_begin().is_none());
    }

    #[tokio::test]
    async fn test_burst_skipped_while_result_is_presented() {
        let debouncer = DecodeDebouncer::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        let ticket = debouncer.try_begin().unwrap();
        let presenting = tokio::spawn(async move {
            let _ = done_rx.await;
            drop(ticket);
        });

        let shown: Vec<_> = (0..3).filter_map(|_| debouncer.try_begin()).collect();
        assert!(shown.is_empty());

        done_tx.send(()).unwrap();
        presenting.await.unwrap();
        assert!(debouncer.try_begin().is_some());
    }
}
