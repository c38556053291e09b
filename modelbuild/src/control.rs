//! Run control handle
//!
//! Pause, resume, cancel and end can be requested from any task while a
//! run is in progress. The flags are shared atomics; every change wakes
//! the run loop through a `Notify` so it reacts without waiting for its
//! next poll tick.

use crate::executor::BuildEvent;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

const STOP_NONE: u8 = 0;
const STOP_CANCEL: u8 = 1;
const STOP_END: u8 = 2;

/// Why a run was asked to stop early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// Abort and discard all results
    Cancel,
    /// Stop taking new points and build a model from what is solved
    End,
}

struct ControlState {
    paused: AtomicBool,
    stop: AtomicU8,
    wake: Notify,
}

/// Cloneable handle for steering a running model build
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<ControlState>,
    event_tx: broadcast::Sender<BuildEvent>,
}

impl RunControl {
    pub(crate) fn new(event_tx: broadcast::Sender<BuildEvent>) -> Self {
        Self {
            inner: Arc::new(ControlState {
                paused: AtomicBool::new(false),
                stop: AtomicU8::new(STOP_NONE),
                wake: Notify::new(),
            }),
            event_tx,
        }
    }

    /// Hold back the next exposure until resumed. No-op if already paused.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("Model build paused");
            let _ = self.event_tx.send(BuildEvent::PauseChanged(true));
            self.inner.wake.notify_one();
        }
    }

    /// No-op if not paused
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("Model build resumed");
            let _ = self.event_tx.send(BuildEvent::PauseChanged(false));
            self.inner.wake.notify_one();
        }
    }

    pub fn cancel(&self) {
        self.request_stop(STOP_CANCEL);
    }

    pub fn end(&self) {
        self.request_stop(STOP_END);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst) == STOP_CANCEL
    }

    pub fn is_ended(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst) == STOP_END
    }

    /// True once either cancel or end was requested
    pub fn is_stopping(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst) != STOP_NONE
    }

    pub fn stop_request(&self) -> Option<StopRequest> {
        match self.inner.stop.load(Ordering::SeqCst) {
            STOP_CANCEL => Some(StopRequest::Cancel),
            STOP_END => Some(StopRequest::End),
            _ => None,
        }
    }

    // The first stop request wins; later ones are logged and dropped
    fn request_stop(&self, code: u8) {
        match self.inner.stop.compare_exchange(STOP_NONE, code, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => {
                if code == STOP_CANCEL {
                    tracing::info!("Model build cancel requested");
                } else {
                    tracing::info!("Model build end requested");
                }
                self.inner.wake.notify_one();
            }
            Err(existing) => {
                tracing::debug!("Ignoring stop request {}, already stopping ({})", code, existing);
            }
        }
    }

    /// Clear all flags before a new run
    pub(crate) fn reset(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.stop.store(STOP_NONE, Ordering::SeqCst);
    }

    /// Resolves on the next pause/resume/stop change
    pub(crate) async fn changed(&self) {
        self.inner.wake.notified().await;
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("paused", &self.is_paused())
            .field("stop", &self.stop_request())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_control() -> (RunControl, broadcast::Receiver<BuildEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (RunControl::new(tx), rx)
    }

    #[test]
    fn test_pause_is_idempotent() {
        let (control, mut rx) = new_control();
        control.pause();
        control.pause();
        assert!(control.is_paused());
        control.resume();
        control.resume();
        assert!(!control.is_paused());

        assert!(matches!(rx.try_recv(), Ok(BuildEvent::PauseChanged(true))));
        assert!(matches!(rx.try_recv(), Ok(BuildEvent::PauseChanged(false))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_resume_without_pause_emits_nothing() {
        let (control, mut rx) = new_control();
        control.resume();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_first_stop_request_wins() {
        let (control, _rx) = new_control();
        control.end();
        control.cancel();
        assert!(control.is_ended());
        assert!(!control.is_cancelled());
        assert_eq!(control.stop_request(), Some(StopRequest::End));

        let (control, _rx) = new_control();
        control.cancel();
        control.end();
        assert!(control.is_cancelled());
        assert_eq!(control.stop_request(), Some(StopRequest::Cancel));
    }

    #[test]
    fn test_reset_clears_flags() {
        let (control, _rx) = new_control();
        control.pause();
        control.cancel();
        control.reset();
        assert!(!control.is_paused());
        assert!(!control.is_stopping());
        assert_eq!(control.stop_request(), None);
    }

    #[tokio::test]
    async fn test_changed_wakes_on_stop() {
        let (control, _rx) = new_control();
        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.changed().await });
        control.cancel();
        handle.await.unwrap();
    }
}
