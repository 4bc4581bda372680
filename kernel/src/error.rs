use thiserror::Error;

/// Top-level kernel error, for operations that can fail outside the
/// buffer-pump contract (binding, session lookup, ...).
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation attempted on a handler that is no longer running")]
    HandlerGone,
}
