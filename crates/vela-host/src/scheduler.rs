//! Frame scheduler — the single `tick()` that sequences everything.
//!
//! Each tick executes a fixed order: pump platform events, one poll pass
//! over the substrate, due timers, background completions, microtasks,
//! the animation batch, then frame-scoped handle release. The tick is
//! never re-entered; work arriving mid-tick is buffered for the next one.
//!
//! One logical main thread owns the engine and all script-visible state.
//! [`HostContext`] is the reentrant surface native bindings call back
//! into mid-tick (it is deliberately `!Send` — handles never leave the
//! main thread).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vela_sdk::{CallArg, Payload, RawValue, ScriptEngine};

use crate::error::HostError;
use crate::handles::{FrameScope, Protected};
use crate::substrate::{Completion, CompletionKind, Substrate};
use crate::timers::{TimerId, Timers};
use crate::crash;

/// Consecutive idle ticks before a headless loop drains out.
const IDLE_DRAIN_TICKS: u32 = 3;

/// Upper bound on inter-tick sleep, so completions are picked up promptly.
const MAX_TICK_WAIT: Duration = Duration::from_millis(1);

/// Outcome of one platform event pump pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Keep looping.
    Continue,
    /// The platform asked the application to quit.
    QuitRequested,
}

/// Optional windowing/input event source.
///
/// Its absence switches the loop to headless termination policy; it never
/// changes tick ordering.
pub trait EventSource {
    /// Pump pending native events. Runs as step 1 of every tick.
    fn pump(&mut self) -> PumpOutcome;
}

/// Opaque id for a registered animation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameCallbackId(u64);

impl FrameCallbackId {
    /// Numeric form, for marshaling to scripts.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Default)]
struct FrameCallbacks {
    next_id: u64,
    registered: Vec<(FrameCallbackId, Protected)>,
}

impl FrameCallbacks {
    fn register(&mut self, callback: Protected) -> FrameCallbackId {
        self.next_id += 1;
        let id = FrameCallbackId(self.next_id);
        self.registered.push((id, callback));
        id
    }

    fn cancel(&mut self, id: FrameCallbackId) -> Option<Protected> {
        let index = self.registered.iter().position(|(i, _)| *i == id)?;
        Some(self.registered.remove(index).1)
    }

    /// Snapshot the current registrations. Callbacks registered while the
    /// batch runs land in the fresh list and defer to the next tick.
    fn take_batch(&mut self) -> Vec<(FrameCallbackId, Protected)> {
        std::mem::take(&mut self.registered)
    }

    fn clear(&mut self) -> Vec<Protected> {
        std::mem::take(&mut self.registered)
            .into_iter()
            .map(|(_, cb)| cb)
            .collect()
    }

    fn len(&self) -> usize {
        self.registered.len()
    }
}

/// Main-thread record of what a drained completion should do.
enum PendingAction {
    /// Invoke this callback with the `(result, error)` convention.
    Invoke(Protected),
    /// A cancelled timer's native resource finished closing.
    TimerClosed(TimerId),
}

/// All loop state that native bindings may touch reentrantly.
struct LoopState {
    timers: Timers,
    frames: FrameCallbacks,
    pending: HashMap<u64, PendingAction>,
    frame_scope: FrameScope,
    deferred_release: Vec<Protected>,
    quit: bool,
    shutting_down: bool,
}

impl LoopState {
    fn new() -> Self {
        Self {
            timers: Timers::new(),
            frames: FrameCallbacks::default(),
            pending: HashMap::new(),
            frame_scope: FrameScope::new(),
            deferred_release: Vec::new(),
            quit: false,
            shutting_down: false,
        }
    }
}

/// Reentrant handle to the loop, for native bindings invoked mid-tick.
///
/// Cloning is cheap; all clones share the same loop. The type is
/// intentionally not `Send`: script handles stay on the main thread.
#[derive(Clone)]
pub struct HostContext {
    state: Rc<RefCell<LoopState>>,
    substrate: Arc<Substrate>,
}

impl HostContext {
    /// Register a timer. Consumes one owned reference to `callback`.
    ///
    /// Repeating periods are clamped to 1 ms. The returned id stays valid
    /// until the timer fires (one-shot), is cancelled, or the script is
    /// reloaded.
    pub fn set_timer(&self, callback: RawValue, delay_ms: u64, repeating: bool) -> TimerId {
        let mut state = self.state.borrow_mut();
        let handle = Protected::adopt(callback);
        if state.shutting_down {
            // Intake has stopped; adopt and discard so the reference is
            // still balanced.
            let id = state.timers.set(
                Instant::now(),
                handle,
                Duration::from_millis(delay_ms),
                repeating,
            );
            if let Some(h) = state.timers.cancel(id) {
                state.deferred_release.push(h);
            }
            return id;
        }
        state.timers.set(
            Instant::now(),
            handle,
            Duration::from_millis(delay_ms),
            repeating,
        )
    }

    /// Cancel a timer. Synchronous for the caller: the id is invalid
    /// immediately, even if a firing was already queued. Returns whether
    /// the id named a live timer.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let cancelled = {
            let mut state = self.state.borrow_mut();
            match state.timers.cancel(id) {
                Some(handle) => {
                    state.deferred_release.push(handle);
                    true
                }
                None => false,
            }
        };
        if cancelled {
            // The native resource closes asynchronously; the close
            // completion performs final bookkeeping next tick and no-ops
            // once shutdown has begun.
            let submitted = self
                .substrate
                .submit(CompletionKind::Timer, || Ok(Payload::Empty));
            if let Ok(seq) = submitted {
                self.state
                    .borrow_mut()
                    .pending
                    .insert(seq, PendingAction::TimerClosed(id));
            }
        }
        cancelled
    }

    /// Register an animation callback for the next batch. Consumes one
    /// owned reference to `callback`.
    pub fn request_frame(&self, callback: RawValue) -> FrameCallbackId {
        let mut state = self.state.borrow_mut();
        let handle = Protected::adopt(callback);
        if state.shutting_down {
            state.deferred_release.push(handle);
            state.frames.next_id += 1;
            return FrameCallbackId(state.frames.next_id);
        }
        state.frames.register(handle)
    }

    /// Remove a not-yet-run animation callback.
    pub fn cancel_frame(&self, id: FrameCallbackId) -> bool {
        let mut state = self.state.borrow_mut();
        match state.frames.cancel(id) {
            Some(handle) => {
                state.deferred_release.push(handle);
                true
            }
            None => false,
        }
    }

    /// Submit background work with a completion callback. Consumes one
    /// owned reference to `callback`.
    ///
    /// The closure runs off the main thread and must not touch engine
    /// state; its result reaches `callback` as `(result, error)` no
    /// earlier than the next tick.
    pub fn submit(
        &self,
        kind: CompletionKind,
        callback: RawValue,
        work: impl FnOnce() -> Result<Payload, String> + Send + 'static,
    ) -> Result<(), HostError> {
        let handle = Protected::adopt(callback);
        match self.substrate.submit(kind, work) {
            Ok(seq) => {
                self.state
                    .borrow_mut()
                    .pending
                    .insert(seq, PendingAction::Invoke(handle));
                Ok(())
            }
            Err(e) => {
                self.state.borrow_mut().deferred_release.push(handle);
                Err(e)
            }
        }
    }

    /// Request loop termination. A request made mid-tick lets the tick
    /// finish; no further tick is scheduled.
    pub fn quit(&self) {
        self.state.borrow_mut().quit = true;
    }

    /// Registered timers plus animation callbacks plus unfinished
    /// background work.
    pub fn pending_work(&self) -> usize {
        let state = self.state.borrow();
        state.timers.pending() + state.frames.len() + self.substrate.in_flight()
    }
}

/// Configuration for [`Host::new`].
pub struct HostConfig {
    /// Background pool size; 0 sizes from the CPU count.
    pub worker_threads: usize,
    /// Install the fatal-signal guard at startup.
    pub install_crash_guard: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            install_crash_guard: true,
        }
    }
}

/// The runtime host: owns the engine, the substrate, and the loop state,
/// and drives them through [`tick`](Host::tick)/[`run`](Host::run).
pub struct Host<E: ScriptEngine> {
    engine: E,
    substrate: Arc<Substrate>,
    state: Rc<RefCell<LoopState>>,
    event_source: Option<Box<dyn EventSource>>,
    epoch: Instant,
    idle_ticks: u32,
    in_tick: bool,
    shutdown_done: bool,
}

impl<E: ScriptEngine> Host<E> {
    /// Start the substrate and take ownership of the engine. Any failure
    /// here is fatal to startup and leaves nothing running.
    pub fn new(engine: E, config: HostConfig) -> Result<Self, HostError> {
        if config.install_crash_guard {
            crash::install();
        }
        let substrate = Arc::new(Substrate::start(config.worker_threads)?);
        Ok(Self {
            engine,
            substrate,
            state: Rc::new(RefCell::new(LoopState::new())),
            event_source: None,
            epoch: Instant::now(),
            idle_ticks: 0,
            in_tick: false,
            shutdown_done: false,
        })
    }

    /// Attach a windowing/input event source. Without one the loop runs
    /// headless and drains out when idle.
    pub fn set_event_source(&mut self, source: Box<dyn EventSource>) {
        self.event_source = Some(source);
    }

    /// The owned engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// A reentrant handle for native bindings and embedder calls.
    pub fn context(&self) -> HostContext {
        HostContext {
            state: Rc::clone(&self.state),
            substrate: Arc::clone(&self.substrate),
        }
    }

    /// See [`HostContext::set_timer`].
    pub fn set_timer(&self, callback: RawValue, delay_ms: u64, repeating: bool) -> TimerId {
        self.context().set_timer(callback, delay_ms, repeating)
    }

    /// See [`HostContext::cancel_timer`].
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.context().cancel_timer(id)
    }

    /// See [`HostContext::request_frame`].
    pub fn request_frame(&self, callback: RawValue) -> FrameCallbackId {
        self.context().request_frame(callback)
    }

    /// See [`HostContext::cancel_frame`].
    pub fn cancel_frame(&self, id: FrameCallbackId) -> bool {
        self.context().cancel_frame(id)
    }

    /// See [`HostContext::submit`].
    pub fn submit(
        &self,
        kind: CompletionKind,
        callback: RawValue,
        work: impl FnOnce() -> Result<Payload, String> + Send + 'static,
    ) -> Result<(), HostError> {
        self.context().submit(kind, callback, work)
    }

    /// See [`HostContext::quit`].
    pub fn quit(&self) {
        self.context().quit();
    }

    /// Evaluate a module and keep its namespace alive until the caller
    /// releases the returned handle.
    pub fn eval(&self, source: &str, name: &str) -> Result<Protected, HostError> {
        let value = self.engine.eval(source, name)?;
        Ok(Protected::adopt(value))
    }

    /// Release a handle obtained from [`eval`](Host::eval) or escaped
    /// earlier.
    pub fn release(&self, handle: Protected) {
        handle.release(&self.engine);
    }

    /// One full pass through the loop. Returns false when the loop should
    /// stop (quit requested, or headless idle-drain).
    pub fn tick(&mut self) -> bool {
        debug_assert!(!self.in_tick, "tick re-entered");
        self.in_tick = true;

        // (1) Pump native platform events; may request shutdown.
        if let Some(source) = self.event_source.as_mut() {
            if source.pump() == PumpOutcome::QuitRequested {
                self.state.borrow_mut().quit = true;
            }
        }

        // (2) One non-blocking poll pass. Completions enqueued after this
        // snapshot stay buffered for the next tick.
        let completions = self.substrate.poll();

        // (3) Due timer callbacks; cancelled ids skipped at dequeue time.
        self.fire_due_timers();

        // (4) Completed background work, in submission order per kind.
        self.dispatch_completions(completions);

        // (5) Microtasks, to quiescence.
        if let Err(e) = self.engine.drain_microtasks() {
            log::error!("script fault in microtask: {}", e);
        }

        // (6) The animation batch, one shared timestamp.
        self.run_frame_batch();

        // (7) Frame-scoped handles allocated during steps 1-6.
        self.release_frame_handles();

        self.in_tick = false;

        if self.state.borrow().quit {
            return false;
        }

        if self.event_source.is_none() {
            // Headless: drain out after consecutive idle ticks so batch
            // invocations exit without an explicit quit.
            if self.is_idle() {
                self.idle_ticks += 1;
            } else {
                self.idle_ticks = 0;
            }
            if self.idle_ticks >= IDLE_DRAIN_TICKS {
                return false;
            }
        }
        true
    }

    /// Loop [`tick`](Host::tick) until it returns false, sleeping until
    /// the next timer deadline between passes.
    pub fn run(&mut self) {
        while self.tick() {
            let wait = self
                .state
                .borrow()
                .timers
                .next_deadline()
                .map(|due| due.saturating_duration_since(Instant::now()))
                .unwrap_or(MAX_TICK_WAIT)
                .min(MAX_TICK_WAIT);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    /// The earliest scheduled timer deadline, for loop pacing.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.state.borrow().timers.next_deadline()
    }

    /// Whether nothing is scheduled: no timers, no animation callbacks,
    /// no unfinished background work.
    pub fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.timers.pending() == 0
            && state.frames.len() == 0
            && state.pending.is_empty()
            && self.substrate.in_flight() == 0
    }

    /// Cancel every timer and animation registration and release every
    /// protected handle, so nothing bound to the current script context
    /// can fire again. Used by reload; pending background completions
    /// lose their targets and are dropped when drained.
    pub fn teardown_registrations(&mut self) {
        let handles = {
            let mut state = self.state.borrow_mut();
            let mut handles = state.timers.cancel_all();
            handles.extend(state.frames.clear());
            handles.extend(state.pending.drain().filter_map(|(_, action)| match action {
                PendingAction::Invoke(handle) => Some(handle),
                PendingAction::TimerClosed(_) => None,
            }));
            handles.append(&mut state.deferred_release);
            handles
        };
        for handle in handles {
            handle.release(&self.engine);
        }
    }

    /// Orderly shutdown: stop accepting work, cancel timers and
    /// registrations, drain background queues, run two collection
    /// passes. Idempotent; the engine itself is released on drop, after
    /// everything else, so no late completion can fire into it.
    pub fn shutdown(&mut self) {
        if !self.shutdown_done {
            self.shutdown_done = true;
            self.state.borrow_mut().shutting_down = true;
            self.teardown_registrations();
            self.substrate.shutdown();
            self.release_frame_handles();
            self.engine.collect_garbage();
            self.engine.collect_garbage();
        } else {
            // References adopted by refused registrations after shutdown
            // still drain here.
            let deferred =
                std::mem::take(&mut self.state.borrow_mut().deferred_release);
            for handle in deferred {
                handle.release(&self.engine);
            }
        }
    }

    fn fire_due_timers(&mut self) {
        let due = self.state.borrow_mut().timers.take_due(Instant::now());
        for timer in due {
            // A callback earlier in this batch may have cancelled this id.
            if !self.state.borrow().timers.is_live(timer.id) {
                continue;
            }
            // Timer callbacks take no arguments.
            match self.engine.call(timer.callback, &[]) {
                Ok(ret) => self.state.borrow_mut().frame_scope.retain(ret),
                Err(e) => log::error!("script fault in timer callback: {}", e),
            }
            if !timer.repeating {
                let handle = self.state.borrow_mut().timers.finish_one_shot(timer.id);
                if let Some(handle) = handle {
                    handle.release(&self.engine);
                }
            }
        }
    }

    fn dispatch_completions(&mut self, completions: Vec<Completion>) {
        for completion in completions {
            let action = self.state.borrow_mut().pending.remove(&completion.seq);
            match action {
                // Target was torn down (reload) between submit and drain.
                None => {}
                Some(PendingAction::TimerClosed(id)) => {
                    let mut state = self.state.borrow_mut();
                    if !state.shutting_down {
                        state.timers.close_finished(id);
                    }
                }
                Some(PendingAction::Invoke(handle)) => {
                    let args = match completion.result {
                        Ok(payload) => [payload.into_arg(), CallArg::Null],
                        Err(message) => [CallArg::Null, CallArg::String(message)],
                    };
                    match self.engine.call(handle.value(), &args) {
                        Ok(ret) => self.state.borrow_mut().frame_scope.retain(ret),
                        Err(e) => log::error!("script fault in completion callback: {}", e),
                    }
                    handle.release(&self.engine);
                }
            }
        }
    }

    fn run_frame_batch(&mut self) {
        let batch = self.state.borrow_mut().frames.take_batch();
        if batch.is_empty() {
            return;
        }
        // One monotonic timestamp for the whole batch.
        let timestamp = self.epoch.elapsed().as_secs_f64() * 1000.0;
        for (_, handle) in batch {
            match self.engine.call(handle.value(), &[CallArg::F64(timestamp)]) {
                Ok(ret) => self.state.borrow_mut().frame_scope.retain(ret),
                Err(e) => log::error!("script fault in animation callback: {}", e),
            }
            // Each registration runs exactly once.
            handle.release(&self.engine);
        }
    }

    fn release_frame_handles(&mut self) {
        let (mut scope, deferred) = {
            let mut state = self.state.borrow_mut();
            (
                std::mem::take(&mut state.frame_scope),
                std::mem::take(&mut state.deferred_release),
            )
        };
        scope.release_all(&self.engine);
        for handle in deferred {
            handle.release(&self.engine);
        }
    }
}

impl<E: ScriptEngine> Drop for Host<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
