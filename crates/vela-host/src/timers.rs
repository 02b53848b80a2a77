//! Timer subsystem: one-shot and repeating timers with deterministic
//! cancellation.
//!
//! Deadlines live in a min-heap; the scheduler extracts due entries once
//! per tick. Cancellation is synchronous from the caller's view: the id
//! is invalid immediately and the callback handle is handed back for
//! deferred release, while the underlying native resource closes
//! asynchronously and reports through a close completion. The fire-vs-
//! cancel race is resolved at dequeue time against the cancelled set,
//! never best-effort.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use vela_sdk::RawValue;

use crate::handles::Protected;

/// Repeating timers never fire more often than this.
pub const MIN_REPEAT_PERIOD: Duration = Duration::from_millis(1);

/// Opaque timer id, valid for the current script load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Numeric form, for marshaling to scripts.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild an id from its numeric form.
    pub fn from_u64(raw: u64) -> Self {
        TimerId(raw)
    }
}

struct Timer {
    callback: Protected,
    repeating: bool,
    period: Duration,
}

/// Entry in the deadline heap (min-heap by due time).
struct Deadline {
    due: Instant,
    id: TimerId,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for min-heap
        other.due.cmp(&self.due)
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for Deadline {}

/// A timer extracted by [`Timers::take_due`], ready to be invoked.
pub struct DueTimer {
    /// The timer's id.
    pub id: TimerId,
    /// Callback value, kept alive by the registry entry.
    pub callback: RawValue,
    /// Whether the timer stays registered after this firing.
    pub repeating: bool,
}

/// Main-thread timer registry.
#[derive(Default)]
pub struct Timers {
    next_id: u64,
    active: HashMap<TimerId, Timer>,
    heap: BinaryHeap<Deadline>,
    cancelled: HashSet<TimerId>,
}

impl Timers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer. The callback handle is held until the single
    /// firing (one-shot) or until cancellation (repeating).
    pub fn set(
        &mut self,
        now: Instant,
        callback: Protected,
        delay: Duration,
        repeating: bool,
    ) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);

        let period = if repeating {
            delay.max(MIN_REPEAT_PERIOD)
        } else {
            delay
        };

        self.active.insert(
            id,
            Timer {
                callback,
                repeating,
                period,
            },
        );
        self.heap.push(Deadline {
            due: now + delay,
            id,
        });
        id
    }

    /// Cancel a timer. The id is invalid from this call on, even if a
    /// firing was already queued; the callback handle is returned for
    /// deferred release. Unknown ids return None.
    pub fn cancel(&mut self, id: TimerId) -> Option<Protected> {
        let timer = self.active.remove(&id)?;
        self.cancelled.insert(id);
        Some(timer.callback)
    }

    /// Whether the id names a registered, uncancelled timer.
    pub fn is_live(&self, id: TimerId) -> bool {
        self.active.contains_key(&id) && !self.cancelled.contains(&id)
    }

    /// Extract every timer due at `now`, rescheduling repeating ones.
    /// Ids in the cancelled set are skipped here, at dequeue time.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueTimer> {
        let mut due = Vec::new();
        while let Some(next) = self.heap.peek() {
            if next.due > now {
                break;
            }
            let entry = self.heap.pop().unwrap();

            if self.cancelled.contains(&entry.id) {
                continue;
            }
            let Some(timer) = self.active.get(&entry.id) else {
                continue; // stale heap entry for an already-finished timer
            };

            due.push(DueTimer {
                id: entry.id,
                callback: timer.callback.value(),
                repeating: timer.repeating,
            });

            if timer.repeating {
                self.heap.push(Deadline {
                    due: now + timer.period,
                    id: entry.id,
                });
            }
        }
        due
    }

    /// Remove a one-shot timer after its single firing, returning its
    /// callback handle for release.
    pub fn finish_one_shot(&mut self, id: TimerId) -> Option<Protected> {
        self.active.remove(&id).map(|t| t.callback)
    }

    /// Final bookkeeping once the native resource finished closing:
    /// drop the cancellation tombstone.
    pub fn close_finished(&mut self, id: TimerId) {
        self.cancelled.remove(&id);
    }

    /// Cancel everything, returning all callback handles for release.
    /// Ids stay invalid; tombstones are cleared because no close
    /// completions will follow a wholesale teardown.
    pub fn cancel_all(&mut self) -> Vec<Protected> {
        self.heap.clear();
        self.cancelled.clear();
        self.active.drain().map(|(_, t)| t.callback).collect()
    }

    /// Number of registered timers.
    pub fn pending(&self) -> usize {
        self.active.len()
    }

    /// The earliest scheduled deadline, for loop pacing.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|d| d.due)
    }
}
