//! A recording script engine for embedder and host tests.
//!
//! `StubEngine` mints opaque values, tracks keep-alive references, and
//! records every host→engine transition so tests can assert on ordering
//! and on reference-count hygiene. Per-function hooks let a test stand in
//! for script code that calls back into the host mid-tick.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::engine::{EngineError, ScriptEngine};
use crate::value::{CallArg, RawValue};

/// A host→engine transition recorded by [`StubEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum StubEvent {
    /// A module was evaluated under this name.
    Eval(String),
    /// A callable value was invoked.
    Call(RawValue),
    /// The microtask queue was drained.
    DrainMicrotasks,
    /// A garbage collection pass was requested.
    CollectGarbage,
}

type Hook = Rc<dyn Fn(&StubEngine, &[CallArg])>;
type Microtask = Rc<dyn Fn(&StubEngine)>;

#[derive(Default)]
struct StubState {
    next_id: u64,
    refcounts: HashMap<u64, i64>,
    invocations: HashMap<u64, usize>,
    last_args: HashMap<u64, Vec<CallArg>>,
    hooks: HashMap<u64, Hook>,
    eval_hook: Option<Rc<dyn Fn(&StubEngine, &str, &str)>>,
    failing: HashSet<u64>,
    fail_next_eval: Option<String>,
    microtasks: Vec<Microtask>,
    events: Vec<StubEvent>,
    /// Set when a protect/unprotect call targeted a dead or unknown value.
    refcount_defect: bool,
}

/// Recording engine; see the module docs.
#[derive(Default)]
pub struct StubEngine {
    inner: RefCell<StubState>,
}

impl StubEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&self) -> RawValue {
        let mut st = self.inner.borrow_mut();
        st.next_id += 1;
        let id = st.next_id;
        st.refcounts.insert(id, 1);
        RawValue::from_bits(id)
    }

    /// Mint a callable value with one owned reference.
    pub fn make_function(&self) -> RawValue {
        self.mint()
    }

    /// Run `hook` whenever `func` is invoked. The hook runs while no
    /// internal borrow is held, so it may call back into the engine and
    /// the host.
    pub fn set_hook(&self, func: RawValue, hook: impl Fn(&StubEngine, &[CallArg]) + 'static) {
        self.inner
            .borrow_mut()
            .hooks
            .insert(func.bits(), Rc::new(hook));
    }

    /// Run `hook` on every `eval`, standing in for the evaluated script.
    pub fn set_eval_hook(&self, hook: impl Fn(&StubEngine, &str, &str) + 'static) {
        self.inner.borrow_mut().eval_hook = Some(Rc::new(hook));
    }

    /// Make every invocation of `func` raise an uncaught exception.
    pub fn fail_function(&self, func: RawValue) {
        self.inner.borrow_mut().failing.insert(func.bits());
    }

    /// Make the next `eval` fail with the given message.
    pub fn fail_next_eval(&self, message: impl Into<String>) {
        self.inner.borrow_mut().fail_next_eval = Some(message.into());
    }

    /// Queue a microtask; drained by [`ScriptEngine::drain_microtasks`].
    pub fn enqueue_microtask(&self, task: impl Fn(&StubEngine) + 'static) {
        self.inner.borrow_mut().microtasks.push(Rc::new(task));
    }

    /// How many times `func` has been invoked.
    pub fn invocations(&self, func: RawValue) -> usize {
        self.inner
            .borrow()
            .invocations
            .get(&func.bits())
            .copied()
            .unwrap_or(0)
    }

    /// The arguments of the most recent invocation of `func`.
    pub fn last_args(&self, func: RawValue) -> Option<Vec<CallArg>> {
        self.inner.borrow().last_args.get(&func.bits()).cloned()
    }

    /// Number of values with at least one live reference.
    pub fn live_values(&self) -> usize {
        self.inner
            .borrow()
            .refcounts
            .values()
            .filter(|&&c| c > 0)
            .count()
    }

    /// The keep-alive count of a value (0 when collected).
    pub fn refcount(&self, value: RawValue) -> i64 {
        self.inner
            .borrow()
            .refcounts
            .get(&value.bits())
            .copied()
            .unwrap_or(0)
    }

    /// Whether any protect/unprotect call targeted a dead or unknown value.
    pub fn refcount_defect(&self) -> bool {
        self.inner.borrow().refcount_defect
    }

    /// All recorded transitions, in order.
    pub fn events(&self) -> Vec<StubEvent> {
        self.inner.borrow().events.clone()
    }
}

impl ScriptEngine for StubEngine {
    fn eval(&self, source: &str, name: &str) -> Result<RawValue, EngineError> {
        let (failure, hook) = {
            let mut st = self.inner.borrow_mut();
            st.events.push(StubEvent::Eval(name.to_string()));
            (st.fail_next_eval.take(), st.eval_hook.clone())
        };
        if let Some(message) = failure {
            return Err(EngineError::Uncaught(message));
        }
        if let Some(hook) = hook {
            hook(self, source, name);
        }
        Ok(self.mint())
    }

    fn call(&self, func: RawValue, args: &[CallArg]) -> Result<RawValue, EngineError> {
        let (fails, hook) = {
            let mut st = self.inner.borrow_mut();
            if st.refcounts.get(&func.bits()).copied().unwrap_or(0) <= 0 {
                st.refcount_defect = true;
                return Err(EngineError::InvalidHandle);
            }
            st.events.push(StubEvent::Call(func));
            *st.invocations.entry(func.bits()).or_default() += 1;
            st.last_args.insert(func.bits(), args.to_vec());
            (
                st.failing.contains(&func.bits()),
                st.hooks.get(&func.bits()).cloned(),
            )
        };
        if fails {
            return Err(EngineError::Uncaught("stub function failure".into()));
        }
        if let Some(hook) = hook {
            hook(self, args);
        }
        Ok(self.mint())
    }

    fn protect(&self, value: RawValue) {
        if value.is_null() {
            return;
        }
        let mut st = self.inner.borrow_mut();
        match st.refcounts.get_mut(&value.bits()) {
            Some(count) if *count > 0 => *count += 1,
            _ => st.refcount_defect = true,
        }
    }

    fn unprotect(&self, value: RawValue) {
        if value.is_null() {
            return;
        }
        let mut st = self.inner.borrow_mut();
        match st.refcounts.get_mut(&value.bits()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => st.refcount_defect = true,
        }
    }

    fn drain_microtasks(&self) -> Result<(), EngineError> {
        self.inner.borrow_mut().events.push(StubEvent::DrainMicrotasks);
        // Run to quiescence: tasks queued by a microtask run in the same drain.
        loop {
            let batch: Vec<Microtask> = std::mem::take(&mut self.inner.borrow_mut().microtasks);
            if batch.is_empty() {
                return Ok(());
            }
            for task in batch {
                task(self);
            }
        }
    }

    fn collect_garbage(&self) {
        let mut st = self.inner.borrow_mut();
        st.events.push(StubEvent::CollectGarbage);
        st.refcounts.retain(|_, count| *count > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_lifecycle() {
        let engine = StubEngine::new();
        let f = engine.make_function();
        assert_eq!(engine.refcount(f), 1);

        engine.protect(f);
        assert_eq!(engine.refcount(f), 2);

        engine.unprotect(f);
        engine.unprotect(f);
        assert_eq!(engine.refcount(f), 0);
        assert!(!engine.refcount_defect());

        // One release too many is a detectable defect.
        engine.unprotect(f);
        assert!(engine.refcount_defect());
    }

    #[test]
    fn test_call_records_and_returns_owned_value() {
        let engine = StubEngine::new();
        let f = engine.make_function();
        let ret = engine.call(f, &[CallArg::F64(3.0)]).unwrap();
        assert_eq!(engine.invocations(f), 1);
        assert_eq!(engine.last_args(f), Some(vec![CallArg::F64(3.0)]));
        assert_eq!(engine.refcount(ret), 1);
    }

    #[test]
    fn test_hook_can_reenter_engine() {
        let engine = StubEngine::new();
        let f = engine.make_function();
        engine.set_hook(f, |eng, _args| {
            let inner = eng.make_function();
            assert_eq!(eng.refcount(inner), 1);
        });
        engine.call(f, &[]).unwrap();
        assert_eq!(engine.invocations(f), 1);
    }

    #[test]
    fn test_failing_function_reports_uncaught() {
        let engine = StubEngine::new();
        let f = engine.make_function();
        engine.fail_function(f);
        let err = engine.call(f, &[]).unwrap_err();
        assert!(matches!(err, EngineError::Uncaught(_)));
        // The failed call is still recorded.
        assert_eq!(engine.invocations(f), 1);
    }

    #[test]
    fn test_microtasks_drain_to_quiescence() {
        let engine = StubEngine::new();
        let f = engine.make_function();
        let inner = f;
        engine.enqueue_microtask(move |eng| {
            // A microtask queued during the drain still runs in this drain.
            eng.enqueue_microtask(move |eng| {
                eng.call(inner, &[]).unwrap();
            });
        });
        engine.drain_microtasks().unwrap();
        assert_eq!(engine.invocations(f), 1);
    }

    #[test]
    fn test_calling_dead_value_is_a_defect() {
        let engine = StubEngine::new();
        let f = engine.make_function();
        engine.unprotect(f);
        assert!(engine.call(f, &[]).is_err());
        assert!(engine.refcount_defect());
    }
}
