use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Why a capture run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT / Ctrl-C.
    Interrupted,
    /// The configured frame limit was reached.
    FrameLimit,
    /// Requested programmatically.
    Requested,
}

/// One-shot stop trigger shared between the control thread and whoever
/// decides the run is over. The first reason wins.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<Option<StopReason>>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the signal had already been triggered.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let (lock, cond) = &*self.inner;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        cond.notify_all();
        true
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Block until triggered.
    pub fn wait(&self) -> StopReason {
        let (lock, cond) = &*self.inner;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(reason) = *slot {
                return reason;
            }
            slot = cond.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until triggered or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let (lock, cond) = &*self.inner;
        let slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (slot, _) = cond
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *slot
    }
}
