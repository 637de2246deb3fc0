//! Engine-wide error taxonomy.

use thiserror::Error;

/// Errors surfaced by the grid engine.
///
/// Startup errors ([`EngineError::InvalidConfig`], [`EngineError::CapabilityUnmet`]) are
/// fatal and propagate to the bootstrap layer. Everything else is handled
/// conservatively by the order manager's hot path: logged, folded into local
/// state, and never allowed to unwind the work queue.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("exchange adapter lacks required capability: {0}")]
    CapabilityUnmet(String),

    #[error("transient adapter error: {0}")]
    AdapterTransient(String),

    #[error("order rejected by adapter: {0}")]
    AdapterReject(String),

    #[error("order unknown to both local state and exchange: {0}")]
    UnknownOrder(String),

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("logic error: {0}")]
    Logic(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
