use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hooks for observing graph mutations, eviction and codec activity.
///
/// Implementations must be cheap: the codec calls the timing hooks once per
/// node encoded or decoded, possibly from several eviction workers at once.
pub trait StorageMetrics: Send + Sync {
    /// Records the creation of a new node.
    fn node_created(&self);

    /// Records the removal of a node.
    fn node_removed(&self);

    /// Records the creation of a new edge.
    fn edge_created(&self);

    /// Records the removal of an edge.
    fn edge_removed(&self);

    /// Records `count` nodes moved from resident to cleared by one eviction job.
    fn nodes_evicted(&self, count: usize);

    /// Records a node whose eviction failed; it stays resident.
    fn eviction_failed(&self);

    /// Records a cleared node decoded back into memory.
    fn node_rehydrated(&self);

    /// Records the time spent encoding one node.
    fn node_serialized(&self, elapsed: Duration);

    /// Records the time spent decoding one node.
    fn node_deserialized(&self, elapsed: Duration);
}

/// A [`StorageMetrics`] implementation that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn node_created(&self) {}
    fn node_removed(&self) {}
    fn edge_created(&self) {}
    fn edge_removed(&self) {}
    fn nodes_evicted(&self, _count: usize) {}
    fn eviction_failed(&self) {}
    fn node_rehydrated(&self) {}
    fn node_serialized(&self, _elapsed: Duration) {}
    fn node_deserialized(&self, _elapsed: Duration) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of nodes created.
    pub nodes_created: AtomicU64,

    /// Number of nodes removed.
    pub nodes_removed: AtomicU64,

    /// Number of edges created.
    pub edges_created: AtomicU64,

    /// Number of edges removed.
    pub edges_removed: AtomicU64,

    /// Number of nodes cleared by eviction.
    pub nodes_evicted: AtomicU64,

    /// Number of per-node eviction failures.
    pub eviction_failures: AtomicU64,

    /// Number of nodes decoded back into memory.
    pub nodes_rehydrated: AtomicU64,

    /// Number of nodes encoded.
    pub serializations: AtomicU64,

    /// Total encoding time in nanoseconds.
    pub serialize_nanos: AtomicU64,

    /// Number of nodes decoded.
    pub deserializations: AtomicU64,

    /// Total decoding time in nanoseconds.
    pub deserialize_nanos: AtomicU64,
}

impl CounterMetrics {
    /// Reads a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl StorageMetrics for CounterMetrics {
    fn node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    fn node_removed(&self) {
        self.nodes_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_removed(&self) {
        self.edges_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn nodes_evicted(&self, count: usize) {
        self.nodes_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn eviction_failed(&self) {
        self.eviction_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn node_rehydrated(&self) {
        self.nodes_rehydrated.fetch_add(1, Ordering::Relaxed);
    }

    fn node_serialized(&self, elapsed: Duration) {
        self.serializations.fetch_add(1, Ordering::Relaxed);
        self.serialize_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn node_deserialized(&self, elapsed: Duration) {
        self.deserializations.fetch_add(1, Ordering::Relaxed);
        self.deserialize_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
