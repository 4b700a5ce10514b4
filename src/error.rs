use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

#[derive(Debug, Clone, Error)]
pub enum CaptchaError {
    #[error("{0}")]
    Validation(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Solve timed out after {0:?}")]
    Timeout(Duration),

    #[error("Solve cancelled")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CaptchaError {
    /// Errors caused by the caller's input; surfaced as 4xx and never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CaptchaError::Validation(_) | CaptchaError::UnknownTask(_)
        )
    }

    /// Errors raised inside a solve attempt. These end up in a Failure outcome
    /// instead of propagating out of the task unit.
    pub fn is_solve_failure(&self) -> bool {
        matches!(
            self,
            CaptchaError::Session(_)
                | CaptchaError::Navigation(_)
                | CaptchaError::Solver(_)
                | CaptchaError::Timeout(_)
                | CaptchaError::Cancelled
                | CaptchaError::PoolClosed
        )
    }
}

impl From<AcquireError> for CaptchaError {
    fn from(_: AcquireError) -> Self {
        CaptchaError::PoolClosed
    }
}

impl From<std::io::Error> for CaptchaError {
    fn from(err: std::io::Error) -> Self {
        CaptchaError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CaptchaError {
    fn from(err: serde_json::Error) -> Self {
        CaptchaError::Serialization(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for CaptchaError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        CaptchaError::Session(err.to_string())
    }
}
