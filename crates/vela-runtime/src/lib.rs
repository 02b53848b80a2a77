//! Vela Runtime
//!
//! Binds the runtime host, the embedded bundle VFS, and a script engine
//! into a runnable application. The hosting frontend hands an engine and
//! options to [`Runtime`], loads an entry script, and drives the loop;
//! timers, background reads, hot reload, and shutdown all go through the
//! host underneath.

#![warn(missing_docs)]

mod error;
mod manifest;
mod runtime;

pub use error::RuntimeError;
pub use manifest::{AppInfo, AppManifest, MANIFEST_FILE_NAME};
pub use runtime::{Runtime, RuntimeOptions};

/// Initialize `env_logger` for embedders that have no logger of their
/// own. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init();
}
