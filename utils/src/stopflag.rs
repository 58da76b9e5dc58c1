use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag shared between an orchestrator worker and
/// the long-running loop (simulation run, history scan, RPC poll) it
/// drives.
///
/// Mirrors the role of `threading.Event` in the original Python
/// implementation's `StoppableThread` and the teacher workspace's
/// subsystem stop-flags: checked at loop boundaries and before blocking
/// I/O, never inside a tight simulation step.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Error returned by a loop that observed the stop flag set. Not logged as
/// a failure by callers: cooperative cancellation is an expected outcome.
#[derive(Debug, thiserror::Error)]
#[error("stopped")]
pub struct Stopped;
