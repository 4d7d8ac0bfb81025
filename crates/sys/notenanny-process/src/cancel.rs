use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Shared cancellation flag. Clones observe the same state, so the signal
/// handler, the scan driver and the executor can all hold one.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

/// Returned (inside `anyhow::Error`) when a run was stopped through a
/// [`CancellationToken`] rather than failing on its own.
#[derive(Debug, Error)]
#[error("command cancelled")]
pub struct CommandCancelled;

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CommandCancelled>().is_some()
}
