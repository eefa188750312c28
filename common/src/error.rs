use thiserror::Error;

/// Failures a metric source adapter may report for a single pull. Retry
/// policy lives with the control loop, never in the adapter.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("metric source unreachable: {0}")]
    Unreachable(String),
    #[error("metric source timed out after {0} ms")]
    Timeout(u64),
    #[error("malformed metrics payload: {0}")]
    Malformed(String),
}

/// Failures surfaced by a scaling backend driver.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("backend timed out after {0} s")]
    Timeout(u64),
    #[error("backend internal error: {0}")]
    Internal(String),
}

/// Failures of the execution coordinator itself. Backend failures during a
/// run do not surface here; they are folded into a failed `ScalingEvent`.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("a scaling operation is already in progress for {0}")]
    ScalingInProgress(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
