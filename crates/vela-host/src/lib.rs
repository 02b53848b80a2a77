//! Vela runtime host
//!
//! The cooperative event loop that unifies timers, async I/O completions,
//! background-thread work, and frame-synchronized callbacks into one
//! deterministic, single-threaded sequence of invocations into a foreign,
//! garbage-collected script engine.
//!
//! - [`Substrate`]: non-blocking poll pass over a bounded worker pool
//!   and a thread-safe completion queue
//! - [`Timers`]: one-shot/repeating timers with dequeue-time cancellation
//! - [`Protected`] / [`FrameScope`]: handle lifecycle discipline
//! - [`Host`]: the `tick()`/`run()` frame scheduler tying it together
//! - [`HotReload`]: entry-script watching and reload state machine
//! - [`crash`]: fatal-signal interception

#![warn(missing_docs)]

pub mod crash;
mod error;
mod handles;
mod reload;
mod scheduler;
mod substrate;
mod timers;

pub use error::HostError;
pub use handles::{FrameScope, Protected};
pub use reload::{HotReload, ReloadState};
pub use scheduler::{
    EventSource, FrameCallbackId, Host, HostConfig, HostContext, PumpOutcome,
};
pub use substrate::{Completion, CompletionKind, Substrate};
pub use timers::{DueTimer, TimerId, Timers, MIN_REPEAT_PERIOD};
