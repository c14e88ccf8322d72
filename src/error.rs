use thiserror::Error;

/// Errors raised by the Job Registry (C6).
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(uuid::Uuid),
    #[error("job {0} is not running, cannot cancel")]
    NotRunning(uuid::Uuid),
}

/// Errors raised by the Execution Coordinator (C8).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("execution {0} not found")]
    NotFound(uuid::Uuid),
    #[error("execution {0} depends on {1}, which has not completed")]
    DependencyNotSatisfied(uuid::Uuid, uuid::Uuid),
    #[error("admitting execution {0} would exceed the {1} cap")]
    ResourceExhausted(uuid::Uuid, &'static str),
}

/// Errors raised by the File Search Engine (C3) and its collaborators.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("path does not exist or is not a directory: {0}")]
    InvalidPath(String),
    #[error("path denied by security policy: {0}")]
    PathDenied(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the Result Cache (C4). Presently infallible in practice but
/// kept as a typed surface so callers don't have to guess whether cache failures
/// are recoverable.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry too large to ever fit within the byte budget")]
    EntryTooLarge,
}

/// Top-level failure of the server process, carrying enough information for
/// `main` to pick an exit code (0 success; 2 config; 3 I/O; 4 cancellation;
/// 5 timeout; 1 otherwise).
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("shut down by cancellation signal")]
    Cancelled,
    #[error("timed out waiting on the transport")]
    TimedOut,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Io(_) => 3,
            AppError::Cancelled => 4,
            AppError::TimedOut => 5,
            AppError::Other(_) => 1,
        }
    }

    /// Reclassifies an opaque `anyhow::Error` as `Io` when its root cause is
    /// an `io::Error`, otherwise leaves it as `Other`.
    pub fn classify(err: anyhow::Error) -> Self {
        match err.downcast::<std::io::Error>() {
            Ok(io_err) => AppError::Io(io_err),
            Err(err) => AppError::Other(err),
        }
    }
}
