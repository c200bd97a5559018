use thiserror::Error;

/// Errors surfaced to the embedding language by monitor operations.
///
/// Invariant violations (for example a fat lock word without a monitor) are not
/// represented here; they panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// The calling thread does not own the monitor it tried to exit, notify or wait on.
    #[error("illegal monitor state: {0}")]
    IllegalMonitorState(String),
    /// Timeout arguments of a wait were out of range.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    /// The thread was interrupted while waiting and asked for the interrupt to be raised.
    #[error("thread interrupted while waiting on a monitor")]
    Interrupted,
}

impl MonitorError {
    pub fn is_illegal_monitor_state(&self) -> bool {
        matches!(self, Self::IllegalMonitorState(_))
    }
}
