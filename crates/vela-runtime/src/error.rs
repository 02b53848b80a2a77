//! Runtime error types.

use vela_host::HostError;

/// Errors that can occur while loading, reloading, or running an
/// application.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Host-level failure (substrate startup, engine entry point, watch).
    #[error("{0}")]
    Host(#[from] HostError),

    /// The app manifest could not be parsed.
    #[error("manifest error: {0}")]
    Manifest(#[from] toml::de::Error),

    /// `reload_script` was called before any script was loaded.
    #[error("no entry script loaded")]
    NoEntryLoaded,
}
