//! Host error types.

use vela_sdk::EngineError;

/// Errors that can occur while starting or driving the host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// File or thread I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The script engine reported a failure at an entry point (not inside
    /// loop-recovered callbacks).
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// New work was refused because shutdown has begun.
    #[error("host is shutting down")]
    ShuttingDown,

    /// The filesystem watch primitive failed.
    #[error("watch error: {0}")]
    Watch(String),
}

impl From<notify::Error> for HostError {
    fn from(err: notify::Error) -> Self {
        HostError::Watch(err.to_string())
    }
}
