//! Handle lifecycle: frame-scoped values and escaped (protected) handles.
//!
//! Every engine value the host touches is either scoped to the tick that
//! produced it (collected in a [`FrameScope`] and released when the tick
//! ends) or escaped into a [`Protected`] handle that survives across
//! ticks (timer callbacks, pending completion callbacks) and must be
//! released exactly once. The ownership rules make double-release
//! impossible to express; a leak trips a debug assertion.

use vela_sdk::{RawValue, ScriptEngine};

/// A keep-alive reference that outlives the tick it was created in.
///
/// `release` consumes the handle, so a second release does not compile.
/// Dropping an unreleased handle is a programming defect and fails a
/// debug assertion.
#[derive(Debug)]
pub struct Protected {
    value: RawValue,
    released: bool,
}

impl Protected {
    /// Take over an owned keep-alive reference (one the engine already
    /// minted for the caller, e.g. a value returned by `call`).
    pub fn adopt(value: RawValue) -> Self {
        Self {
            value,
            released: false,
        }
    }

    /// Mint a new keep-alive reference for a borrowed value.
    pub fn protect(engine: &dyn ScriptEngine, value: RawValue) -> Self {
        engine.protect(value);
        Self::adopt(value)
    }

    /// The underlying engine value.
    pub fn value(&self) -> RawValue {
        self.value
    }

    /// Release the reference. Exactly once, by construction.
    pub fn release(mut self, engine: &dyn ScriptEngine) {
        self.released = true;
        engine.unprotect(self.value);
    }
}

impl Drop for Protected {
    fn drop(&mut self) {
        if !self.released && !std::thread::panicking() {
            debug_assert!(false, "protected handle dropped without release");
        }
    }
}

/// Values allocated during one tick, released together when it ends.
#[derive(Debug, Default)]
pub struct FrameScope {
    values: Vec<RawValue>,
}

impl FrameScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value for release at the end of the current tick.
    pub fn retain(&mut self, value: RawValue) {
        if !value.is_null() {
            self.values.push(value);
        }
    }

    /// Escape a value out of the scope: it will no longer be released at
    /// tick end and the returned handle owns its reference instead.
    pub fn escape(&mut self, value: RawValue) -> Option<Protected> {
        let index = self.values.iter().rposition(|v| *v == value)?;
        self.values.swap_remove(index);
        Some(Protected::adopt(value))
    }

    /// Number of values currently scoped.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the scope holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Release every scoped value.
    pub fn release_all(&mut self, engine: &dyn ScriptEngine) {
        for value in self.values.drain(..) {
            engine.unprotect(value);
        }
    }
}
