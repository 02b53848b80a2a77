//! Vela SDK - Contract types between the host and a script engine
//!
//! The host never links a concrete script engine. Everything it needs
//! (value creation, keep-alive management, function invocation, microtask
//! draining) goes through the [`ScriptEngine`] trait defined here, with
//! values represented as opaque [`RawValue`] handles.
//!
//! Data that crosses the host's thread boundary (background work results)
//! is expressed as [`Payload`], which carries no engine state at all.
//!
//! # Example
//!
//! ```ignore
//! use vela_sdk::{ScriptEngine, StubEngine, CallArg};
//!
//! let engine = StubEngine::new();
//! let func = engine.make_function();
//! engine.call(func, &[CallArg::F64(16.7)]).unwrap();
//! assert_eq!(engine.invocations(func), 1);
//! ```

#![warn(missing_docs)]

mod engine;
mod stub;
mod value;

pub use engine::{EngineError, ScriptEngine};
pub use stub::{StubEngine, StubEvent};
pub use value::{CallArg, Payload, RawValue};
