//! Opaque value handles and plain-data payloads.

/// Opaque reference to a value owned by the script engine.
///
/// A `RawValue` is just a 64-bit token minted by the engine; the host
/// never inspects it. Handles are only meaningful on the thread that owns
/// the engine — background work must not capture them.
///
/// # Ownership
///
/// Every `RawValue` returned by [`ScriptEngine::eval`], [`ScriptEngine::call`]
/// or an engine-side constructor arrives with exactly one keep-alive
/// reference owned by the caller. The caller balances it with one
/// [`ScriptEngine::unprotect`], either at the end of the current tick
/// (frame-scoped) or later (escaped handles).
///
/// [`ScriptEngine::eval`]: crate::ScriptEngine::eval
/// [`ScriptEngine::call`]: crate::ScriptEngine::call
/// [`ScriptEngine::unprotect`]: crate::ScriptEngine::unprotect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawValue(u64);

impl RawValue {
    /// The engine's null/undefined value. Needs no keep-alive bookkeeping.
    pub const NULL: RawValue = RawValue(0);

    /// Wrap a raw engine token.
    pub fn from_bits(bits: u64) -> Self {
        RawValue(bits)
    }

    /// The raw engine token.
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Whether this is the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// An argument marshaled into an engine function invocation.
///
/// Completion callbacks receive the uniform two-argument convention:
/// `(result, error)`, where exactly one of the two is non-null.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    /// The engine's null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number (all script numbers are f64).
    F64(f64),
    /// A string, converted to an engine string at call time.
    String(String),
    /// Raw bytes, converted to an engine byte buffer at call time.
    Bytes(Vec<u8>),
    /// An existing engine value (borrowed for the duration of the call).
    Value(RawValue),
}

/// Result data produced by background work.
///
/// Payloads are plain `Send` data: they are produced on worker threads and
/// marshaled into [`CallArg`]s on the main thread only.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No result data (e.g. a completed side effect).
    Empty,
    /// Binary file or network data.
    Bytes(Vec<u8>),
    /// Text data.
    Text(String),
    /// A numeric result.
    F64(f64),
}

impl Payload {
    /// Marshal this payload into a call argument.
    pub fn into_arg(self) -> CallArg {
        match self {
            Payload::Empty => CallArg::Null,
            Payload::Bytes(b) => CallArg::Bytes(b),
            Payload::Text(s) => CallArg::String(s),
            Payload::F64(n) => CallArg::F64(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(RawValue::NULL.is_null());
        assert!(!RawValue::from_bits(7).is_null());
        assert_eq!(RawValue::from_bits(7).bits(), 7);
    }

    #[test]
    fn test_payload_marshaling() {
        assert_eq!(Payload::Empty.into_arg(), CallArg::Null);
        assert_eq!(
            Payload::Text("hi".into()).into_arg(),
            CallArg::String("hi".into())
        );
        assert_eq!(
            Payload::Bytes(vec![1, 2]).into_arg(),
            CallArg::Bytes(vec![1, 2])
        );
        assert_eq!(Payload::F64(1.5).into_arg(), CallArg::F64(1.5));
    }
}
