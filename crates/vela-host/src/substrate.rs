//! Async I/O substrate: a bounded worker pool plus a thread-safe
//! completion queue.
//!
//! Background closures receive and return only plain `Send` data, never
//! engine handles. Results cross threads exclusively through the
//! mutex-guarded completion queue, which the main thread snapshots once
//! per tick. Because the snapshot happens at the start of the tick, a
//! completion is visible no earlier than the tick after its enqueue, even
//! for work that resolves instantly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use vela_sdk::Payload;

use crate::error::HostError;

/// Queue bound for submitted-but-unclaimed jobs.
const WORK_QUEUE_BOUND: usize = 1024;

/// Largest worker pool the substrate will start when sizing automatically.
const MAX_AUTO_WORKERS: usize = 4;

/// Categories of background work. The declaration order is the dispatch
/// order within one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompletionKind {
    /// Native timer-resource teardown bookkeeping.
    Timer,
    /// File reads.
    File,
    /// Network requests.
    Network,
    /// Heavy compute offload (decode jobs and the like).
    Compute,
}

/// A finished unit of background work, as delivered to the main thread.
#[derive(Debug)]
pub struct Completion {
    /// Category of the originating submission.
    pub kind: CompletionKind,
    /// Submission sequence number, unique per substrate.
    pub seq: u64,
    /// Payload on success, message on failure. Errors are surfaced only
    /// through the callback convention, never thrown.
    pub result: Result<Payload, String>,
}

type Work = Box<dyn FnOnce() -> Result<Payload, String> + Send>;

struct Job {
    kind: CompletionKind,
    seq: u64,
    work: Work,
}

struct Shared {
    completions: Mutex<Vec<Completion>>,
    in_flight: AtomicU64,
    shutdown: AtomicBool,
}

/// Bounded background thread pool with a single-consumer completion queue.
pub struct Substrate {
    shared: Arc<Shared>,
    work_tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_seq: AtomicU64,
}

impl Substrate {
    /// Start the pool. `worker_count` of 0 sizes from the CPU count,
    /// clamped to [`MAX_AUTO_WORKERS`]. Fails cleanly, with no threads
    /// left running, if the OS refuses a spawn.
    pub fn start(worker_count: usize) -> Result<Self, HostError> {
        let count = if worker_count == 0 {
            num_cpus::get().min(MAX_AUTO_WORKERS)
        } else {
            worker_count
        };

        let shared = Arc::new(Shared {
            completions: Mutex::new(Vec::new()),
            in_flight: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let (work_tx, work_rx) = bounded::<Job>(WORK_QUEUE_BOUND);

        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let rx = work_rx.clone();
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("vela-io-worker-{}", i))
                .spawn(move || Self::worker_loop(rx, worker_shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Unwind the threads that did start.
                    shared.shutdown.store(true, Ordering::Release);
                    drop(work_tx);
                    for handle in workers {
                        Self::join_with_timeout(handle, Duration::from_secs(2));
                    }
                    return Err(HostError::Io(e));
                }
            }
        }

        Ok(Self {
            shared,
            work_tx: Mutex::new(Some(work_tx)),
            workers: Mutex::new(workers),
            next_seq: AtomicU64::new(1),
        })
    }

    /// Submit background work. Returns the submission sequence number,
    /// or refuses if shutdown has begun.
    pub fn submit(
        &self,
        kind: CompletionKind,
        work: impl FnOnce() -> Result<Payload, String> + Send + 'static,
    ) -> Result<u64, HostError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(HostError::ShuttingDown);
        }
        let tx = self.work_tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(HostError::ShuttingDown);
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let sent = tx.send(Job {
            kind,
            seq,
            work: Box::new(work),
        });
        if sent.is_err() {
            self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(HostError::ShuttingDown);
        }
        Ok(seq)
    }

    /// One non-blocking poll pass: snapshot the completion queue.
    ///
    /// Returns the drained batch ordered by kind, then by submission
    /// sequence within each kind. Completions enqueued after this call
    /// stay buffered for the next pass.
    pub fn poll(&self) -> Vec<Completion> {
        let mut batch = std::mem::take(&mut *self.shared.completions.lock());
        if batch.is_empty() {
            return batch;
        }
        batch.sort_by_key(|c| (c.kind, c.seq));
        self.shared
            .in_flight
            .fetch_sub(batch.len() as u64, Ordering::AcqRel);
        batch
    }

    /// Submissions not yet drained by [`poll`], including results still
    /// sitting in the completion queue.
    ///
    /// [`poll`]: Substrate::poll
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire) as usize
    }

    /// Whether shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop intake, cancel queued work, and join the pool. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the sender disconnects idle workers.
        self.work_tx.lock().take();

        let timeout = Duration::from_secs(2);
        for handle in self.workers.lock().drain(..) {
            Self::join_with_timeout(handle, timeout);
        }

        // Anything still queued will never be observed.
        let dropped = {
            let mut completions = self.shared.completions.lock();
            std::mem::take(&mut *completions).len()
        };
        if dropped > 0 {
            log::debug!("substrate: dropped {} undrained completions at shutdown", dropped);
        }
        self.shared.in_flight.store(0, Ordering::Release);
    }

    fn worker_loop(work_rx: Receiver<Job>, shared: Arc<Shared>) {
        while !shared.shutdown.load(Ordering::Acquire) {
            let job = match work_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let result = (job.work)();
            shared.completions.lock().push(Completion {
                kind: job.kind,
                seq: job.seq,
                result,
            });
        }
    }

    /// Join a thread with timeout, detach if stuck.
    fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
        let start = Instant::now();
        loop {
            if handle.is_finished() {
                let _ = handle.join();
                return;
            }
            if start.elapsed() > timeout {
                drop(handle);
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for Substrate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_until(substrate: &Substrate, count: usize) -> Vec<Completion> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut all = Vec::new();
        while all.len() < count && Instant::now() < deadline {
            all.extend(substrate.poll());
            thread::sleep(Duration::from_millis(2));
        }
        all
    }

    #[test]
    fn test_submit_and_drain() {
        let substrate = Substrate::start(2).unwrap();
        substrate
            .submit(CompletionKind::File, || Ok(Payload::Bytes(vec![1, 2, 3])))
            .unwrap();

        let batch = drain_until(&substrate, 1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, CompletionKind::File);
        assert_eq!(batch[0].result, Ok(Payload::Bytes(vec![1, 2, 3])));
        assert_eq!(substrate.in_flight(), 0);
        substrate.shutdown();
    }

    #[test]
    fn test_errors_are_data_not_panics() {
        let substrate = Substrate::start(1).unwrap();
        substrate
            .submit(CompletionKind::Network, || Err("connection refused".into()))
            .unwrap();

        let batch = drain_until(&substrate, 1);
        assert_eq!(batch[0].result, Err("connection refused".to_string()));
        substrate.shutdown();
    }

    #[test]
    fn test_submission_order_within_kind() {
        // The first job finishes last; the drained batch must still be in
        // submission order within the kind.
        let substrate = Substrate::start(2).unwrap();
        let slow = substrate
            .submit(CompletionKind::Compute, || {
                thread::sleep(Duration::from_millis(40));
                Ok(Payload::F64(1.0))
            })
            .unwrap();
        let fast = substrate
            .submit(CompletionKind::Compute, || Ok(Payload::F64(2.0)))
            .unwrap();
        assert!(slow < fast);

        let batch = drain_until(&substrate, 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].seq, slow);
        assert_eq!(batch[1].seq, fast);
        substrate.shutdown();
    }

    #[test]
    fn test_kind_order_in_batch() {
        let substrate = Substrate::start(1).unwrap();
        substrate
            .submit(CompletionKind::Compute, || Ok(Payload::Empty))
            .unwrap();
        substrate
            .submit(CompletionKind::File, || Ok(Payload::Empty))
            .unwrap();

        let batch = drain_until(&substrate, 2);
        assert_eq!(batch[0].kind, CompletionKind::File);
        assert_eq!(batch[1].kind, CompletionKind::Compute);
        substrate.shutdown();
    }

    #[test]
    fn test_shutdown_refuses_new_work() {
        let substrate = Substrate::start(1).unwrap();
        substrate.shutdown();
        let refused = substrate.submit(CompletionKind::File, || Ok(Payload::Empty));
        assert!(matches!(refused, Err(HostError::ShuttingDown)));
    }

    #[test]
    fn test_shutdown_idempotent() {
        let substrate = Substrate::start(2).unwrap();
        substrate
            .submit(CompletionKind::Compute, || {
                thread::sleep(Duration::from_millis(10));
                Ok(Payload::Empty)
            })
            .unwrap();
        substrate.shutdown();
        substrate.shutdown();
        assert_eq!(substrate.in_flight(), 0);
    }
}
