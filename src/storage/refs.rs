#![forbid(unsafe_code)]
//! Reference manager: tracks resident node bodies and evicts them to the
//! store when the resident byte budget fills up.
//!
//! Resident nodes are queued in registration order. A monitor thread wakes
//! on a timer or when a registration pushes usage over the threshold, and
//! dispatches one batch at a time across a dedicated rayon pool. Callers that
//! allocate apply backpressure by waiting for in-flight batches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};
use crate::types::NodeId;

/// Outcome of evicting one chunk of candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Bodies written (or already clean) and dropped from memory.
    pub cleared: usize,
    /// Bodies whose write failed; they stay resident.
    pub failed: usize,
    /// Bodies mutated while being written; queued again.
    pub requeued: usize,
    /// Candidates that were no longer resident.
    pub skipped: usize,
}

impl EvictionReport {
    fn merge(&mut self, other: EvictionReport) {
        self.cleared += other.cleared;
        self.failed += other.failed;
        self.requeued += other.requeued;
        self.skipped += other.skipped;
    }
}

/// Owner of resident bodies that can persist and clear them.
pub trait Evictable: Send + Sync {
    /// Persists and clears every candidate it still holds. Failures are
    /// isolated per node and never abort the rest of the batch.
    fn evict(&self, batch: &[NodeId]) -> EvictionReport;
}

/// FIFO of eviction candidates.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    inner: Mutex<VecDeque<NodeId>>,
}

impl CandidateQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a candidate.
    pub fn push(&self, id: NodeId) {
        self.inner.lock().push_back(id);
    }

    /// Removes up to `max` of the oldest candidates.
    pub fn pop_batch(&self, max: usize) -> Vec<NodeId> {
        let mut queue = self.inner.lock();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Returns candidates to the front, keeping their order.
    pub fn push_front_all(&self, ids: &[NodeId]) {
        let mut queue = self.inner.lock();
        for id in ids.iter().rev() {
            queue.push_front(*id);
        }
    }

    /// Number of queued candidates.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Byte counter for resident bodies against a fixed budget.
#[derive(Debug)]
pub struct ResidentBudget {
    used: AtomicUsize,
    limit: usize,
    threshold: f64,
}

impl ResidentBudget {
    /// Creates a budget of `limit` bytes that signals pressure above `threshold * limit`.
    pub fn new(limit: usize, threshold: f64) -> Self {
        Self {
            used: AtomicUsize::new(0),
            limit: limit.max(1),
            threshold,
        }
    }

    /// Adds `bytes` to the resident total.
    pub fn charge(&self, bytes: usize) {
        self.used.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Subtracts `bytes` from the resident total.
    pub fn release(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Resident bytes.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Budget in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Fraction of the budget in use.
    pub fn usage(&self) -> f64 {
        self.used() as f64 / self.limit as f64
    }

    /// Returns true when usage exceeds the threshold.
    pub fn over_threshold(&self) -> bool {
        self.usage() > self.threshold
    }
}

/// Tuning of a [`ReferenceManager`].
#[derive(Clone, Debug)]
pub struct EvictionConfig {
    /// Whether bodies are queued and evicted at all.
    pub enabled: bool,
    /// Upper bound on candidates per dispatched batch.
    pub batch_size: usize,
    /// Number of eviction workers.
    pub worker_threads: usize,
    /// Monitor polling period.
    pub monitor_interval: Duration,
}

#[derive(Default)]
struct ControlState {
    in_flight: usize,
    shutdown: bool,
    report: EvictionReport,
}

#[derive(Default)]
struct Control {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl Control {
    fn finish(&self, report: EvictionReport) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.report.merge(report);
        if state.in_flight == 0 {
            self.changed.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            self.changed.wait(&mut state);
        }
    }
}

struct Dispatcher {
    queue: Arc<CandidateQueue>,
    budget: Arc<ResidentBudget>,
    target: Arc<dyn Evictable>,
    control: Arc<Control>,
    pool: Mutex<Option<ThreadPool>>,
    enabled: bool,
    batch_size: usize,
}

impl Dispatcher {
    /// Pops one batch and spreads it across the pool. Returns the number of
    /// candidates dispatched, zero if a batch is already in flight.
    fn dispatch(&self) -> usize {
        let mut state = self.control.state.lock();
        if state.in_flight > 0 || state.shutdown {
            return 0;
        }
        let pool = self.pool.lock();
        let Some(pool) = pool.as_ref() else {
            return 0;
        };
        let batch = self.queue.pop_batch(self.batch_size);
        if batch.is_empty() {
            return 0;
        }
        let total = batch.len();
        let chunk_len = total.div_ceil(pool.current_num_threads().max(1));
        debug!(
            batch = total,
            chunks = total.div_ceil(chunk_len),
            resident_bytes = self.budget.used(),
            "refs.evict.batch_start"
        );
        for chunk in batch.chunks(chunk_len) {
            let chunk = chunk.to_vec();
            let target = Arc::clone(&self.target);
            let control = Arc::clone(&self.control);
            state.in_flight += 1;
            pool.spawn(move || {
                let report = target.evict(&chunk);
                control.finish(report);
            });
        }
        total
    }
}

/// Resident-body bookkeeping plus the background eviction machinery.
pub struct ReferenceManager {
    dispatcher: Arc<Dispatcher>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ReferenceManager {
    /// Starts the manager. When eviction is disabled no threads are spawned
    /// and registrations only update the budget.
    pub fn start(
        config: EvictionConfig,
        queue: Arc<CandidateQueue>,
        budget: Arc<ResidentBudget>,
        target: Arc<dyn Evictable>,
    ) -> Result<Self> {
        let pool = if config.enabled {
            let pool = ThreadPoolBuilder::new()
                .num_threads(config.worker_threads.max(1))
                .thread_name(|i| format!("spillgraph-evict-{i}"))
                .build()
                .map_err(|err| GraphError::Config(format!("eviction pool: {err}")))?;
            Some(pool)
        } else {
            None
        };
        let dispatcher = Arc::new(Dispatcher {
            queue,
            budget,
            target,
            control: Arc::new(Control::default()),
            pool: Mutex::new(pool),
            enabled: config.enabled,
            batch_size: config.batch_size.max(1),
        });
        let monitor = if config.enabled {
            let dispatcher = Arc::clone(&dispatcher);
            let interval = config.monitor_interval;
            Some(
                thread::Builder::new()
                    .name("spillgraph-monitor".into())
                    .spawn(move || monitor_loop(dispatcher, interval))?,
            )
        } else {
            None
        };
        info!(
            enabled = config.enabled,
            workers = config.worker_threads,
            batch_size = config.batch_size,
            budget_bytes = dispatcher.budget.limit(),
            "refs.start"
        );
        Ok(Self {
            dispatcher,
            monitor: Mutex::new(monitor),
        })
    }

    /// Returns true when bodies are queued for eviction.
    pub fn is_enabled(&self) -> bool {
        self.dispatcher.enabled
    }

    /// Records a newly resident body of `bytes` and queues it for eviction.
    pub fn register(&self, id: NodeId, bytes: usize) {
        let dispatcher = &self.dispatcher;
        dispatcher.budget.charge(bytes);
        if !dispatcher.enabled {
            return;
        }
        dispatcher.queue.push(id);
        if dispatcher.budget.over_threshold() {
            dispatcher.control.changed.notify_all();
        }
    }

    /// Blocks while any eviction batch is in flight.
    pub fn apply_backpressure(&self) {
        self.dispatcher.control.wait_idle();
    }

    /// Evicts every queued candidate and waits until all writes are done.
    pub fn drain_all(&self) {
        if !self.dispatcher.enabled {
            return;
        }
        let mut batches = 0usize;
        loop {
            self.dispatcher.control.wait_idle();
            if self.dispatcher.queue.is_empty() {
                break;
            }
            if self.dispatcher.control.state.lock().shutdown {
                break;
            }
            if self.dispatcher.dispatch() > 0 {
                batches += 1;
            }
        }
        debug!(batches, "refs.drain_all");
    }

    /// Number of queued candidates.
    pub fn queued(&self) -> usize {
        self.dispatcher.queue.len()
    }

    /// Cumulative eviction outcome.
    pub fn report(&self) -> EvictionReport {
        self.dispatcher.control.state.lock().report
    }

    /// Stops the monitor, waits for in-flight batches and releases the pool.
    pub fn shutdown(&self) {
        {
            let mut state = self.dispatcher.control.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.dispatcher.control.changed.notify_all();
        }
        if let Some(handle) = self.monitor.lock().take() {
            if handle.join().is_err() {
                warn!("refs.monitor_panicked");
            }
        }
        self.dispatcher.control.wait_idle();
        drop(self.dispatcher.pool.lock().take());
        info!(report = ?self.report(), "refs.shutdown");
    }
}

impl Drop for ReferenceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn monitor_loop(dispatcher: Arc<Dispatcher>, interval: Duration) {
    loop {
        {
            let mut state = dispatcher.control.state.lock();
            if state.shutdown {
                return;
            }
            dispatcher.control.changed.wait_for(&mut state, interval);
            if state.shutdown {
                return;
            }
            if state.in_flight > 0 {
                continue;
            }
        }
        if dispatcher.budget.over_threshold() && !dispatcher.queue.is_empty() {
            dispatcher.dispatch();
        }
    }
}
