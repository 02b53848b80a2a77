//! The script engine trait.

use crate::value::{CallArg, RawValue};

/// Errors surfaced by a script engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An uncaught exception escaped a script callback.
    #[error("uncaught script exception: {0}")]
    Uncaught(String),

    /// A handle did not refer to a live engine value.
    #[error("invalid value handle")]
    InvalidHandle,

    /// A handle referred to a value that is not callable.
    #[error("value is not callable")]
    NotCallable,

    /// The engine failed to start or has been torn down.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Contract between the host and a foreign, garbage-collected script engine.
///
/// Exactly one engine exists per process and it is owned by the main
/// thread; methods take `&self` because concrete engines are opaque
/// foreign contexts with their own interior state. Implementations are
/// not required to be `Sync` — the host never shares the engine across
/// threads.
///
/// # Keep-alive discipline
///
/// Values returned from [`eval`] and [`call`] carry one keep-alive
/// reference owned by the caller. [`protect`] adds a reference,
/// [`unprotect`] removes one; a value with no remaining references is
/// reclaimed by the engine's collector.
///
/// [`eval`]: ScriptEngine::eval
/// [`call`]: ScriptEngine::call
/// [`protect`]: ScriptEngine::protect
/// [`unprotect`]: ScriptEngine::unprotect
pub trait ScriptEngine {
    /// Evaluate a script as a module. `name` is used for diagnostics.
    ///
    /// Returns the module's namespace value with one owned reference.
    fn eval(&self, source: &str, name: &str) -> Result<RawValue, EngineError>;

    /// Invoke a callable value with marshaled arguments.
    ///
    /// Returns the call's result with one owned reference. An uncaught
    /// script exception is reported as [`EngineError::Uncaught`]; it must
    /// not poison the engine for subsequent calls.
    fn call(&self, func: RawValue, args: &[CallArg]) -> Result<RawValue, EngineError>;

    /// Add a keep-alive reference to a value.
    fn protect(&self, value: RawValue);

    /// Remove one keep-alive reference from a value.
    fn unprotect(&self, value: RawValue);

    /// Run queued microtasks until the queue is empty.
    fn drain_microtasks(&self) -> Result<(), EngineError>;

    /// Request a full garbage collection pass.
    fn collect_garbage(&self);
}
