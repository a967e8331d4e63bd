use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GraphError, Result};

use super::metrics::StorageMetrics;

/// Default resident byte budget (512 MiB).
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 512 * 1024 * 1024;
/// Default fraction of the budget above which eviction starts.
pub const DEFAULT_HEAP_THRESHOLD: f64 = 0.8;
/// Default upper bound on nodes per eviction batch.
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 100_000;
/// Default monitor polling period.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration options supplied when opening a [`super::Graph`].
#[derive(Clone)]
pub struct GraphOptions {
    /// Location of the backing store; `None` opens an ephemeral store.
    pub storage_path: Option<PathBuf>,
    /// Whether cold nodes overflow to the store under memory pressure.
    pub overflow_enabled: bool,
    /// Resident byte budget for node bodies.
    pub memory_budget_bytes: usize,
    /// Fraction of the budget above which eviction starts.
    pub heap_threshold: f64,
    /// Upper bound on nodes per eviction batch.
    pub eviction_batch_size: usize,
    /// Number of eviction worker threads.
    pub worker_threads: usize,
    /// How often the eviction monitor re-checks memory pressure.
    pub monitor_interval: Duration,
    /// Optional metrics collection implementation
    pub metrics: Option<Arc<dyn StorageMetrics>>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GraphOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphOptions")
            .field("storage_path", &self.storage_path)
            .field("overflow_enabled", &self.overflow_enabled)
            .field("memory_budget_bytes", &self.memory_budget_bytes)
            .field("heap_threshold", &self.heap_threshold)
            .field("eviction_batch_size", &self.eviction_batch_size)
            .field("worker_threads", &self.worker_threads)
            .field("monitor_interval", &self.monitor_interval)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl GraphOptions {
    /// Creates options with default settings and an ephemeral store.
    pub fn new() -> Self {
        Self {
            storage_path: None,
            overflow_enabled: true,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            heap_threshold: DEFAULT_HEAP_THRESHOLD,
            eviction_batch_size: DEFAULT_EVICTION_BATCH_SIZE,
            worker_threads: default_worker_threads(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            metrics: None,
        }
    }

    /// Sets the backing store location.
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Enables or disables overflow to the store.
    pub fn overflow(mut self, enabled: bool) -> Self {
        self.overflow_enabled = enabled;
        self
    }

    /// Sets the resident byte budget.
    pub fn memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    /// Sets the eviction threshold as a fraction of the budget.
    pub fn heap_threshold(mut self, threshold: f64) -> Self {
        self.heap_threshold = threshold;
        self
    }

    /// Sets the eviction batch cap.
    pub fn eviction_batch_size(mut self, size: usize) -> Self {
        self.eviction_batch_size = size;
        self
    }

    /// Sets the number of eviction workers.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the monitor polling period.
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parses options from TOML. Unrecognized keys are rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: GraphConfig = toml::from_str(contents)
            .map_err(|err| GraphError::Config(format!("invalid graph config: {err}")))?;
        Ok(config.into_options())
    }

    /// Reads options from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            GraphError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks value ranges; called when a graph is opened.
    pub fn validate(&self) -> Result<()> {
        if !(self.heap_threshold > 0.0 && self.heap_threshold <= 1.0) {
            return Err(GraphError::Config(format!(
                "heap_threshold must be in (0, 1], got {}",
                self.heap_threshold
            )));
        }
        if self.eviction_batch_size == 0 {
            return Err(GraphError::Config(
                "eviction_batch_size must be positive".into(),
            ));
        }
        if self.memory_budget_bytes == 0 {
            return Err(GraphError::Config(
                "memory_budget_bytes must be positive".into(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(GraphError::Config("worker_threads must be positive".into()));
        }
        if self.monitor_interval.is_zero() {
            return Err(GraphError::Config(
                "monitor_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// TOML form of [`GraphOptions`]. Omitted keys keep their defaults.
///
/// ```toml
/// storage_path = "graph.db"
/// overflow = true
/// memory_budget_bytes = 268435456
/// heap_threshold = 0.8
/// eviction_batch_size = 100000
/// worker_threads = 4
/// monitor_interval_ms = 100
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    /// Backing store location.
    pub storage_path: Option<PathBuf>,
    /// Overflow on/off.
    pub overflow: Option<bool>,
    /// Resident byte budget.
    pub memory_budget_bytes: Option<usize>,
    /// Eviction threshold.
    pub heap_threshold: Option<f64>,
    /// Eviction batch cap.
    pub eviction_batch_size: Option<usize>,
    /// Eviction worker count.
    pub worker_threads: Option<usize>,
    /// Monitor period in milliseconds.
    pub monitor_interval_ms: Option<u64>,
}

impl GraphConfig {
    /// Applies the configured values over the defaults.
    pub fn into_options(self) -> GraphOptions {
        let defaults = GraphOptions::new();
        GraphOptions {
            storage_path: self.storage_path,
            overflow_enabled: self.overflow.unwrap_or(defaults.overflow_enabled),
            memory_budget_bytes: self
                .memory_budget_bytes
                .unwrap_or(defaults.memory_budget_bytes),
            heap_threshold: self.heap_threshold.unwrap_or(defaults.heap_threshold),
            eviction_batch_size: self
                .eviction_batch_size
                .unwrap_or(defaults.eviction_batch_size),
            worker_threads: self.worker_threads.unwrap_or(defaults.worker_threads),
            monitor_interval: self
                .monitor_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.monitor_interval),
            metrics: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = GraphOptions::new();
        options.validate().unwrap();
        assert!(options.overflow_enabled);
        assert_eq!(options.eviction_batch_size, 100_000);
        assert!(options.worker_threads >= 1);
    }

    #[test]
    fn toml_overrides_defaults() {
        let options = GraphOptions::from_toml_str(
            r#"
            storage_path = "/tmp/g.db"
            overflow = false
            heap_threshold = 0.5
            monitor_interval_ms = 20
            "#,
        )
        .unwrap();
        assert_eq!(options.storage_path, Some(PathBuf::from("/tmp/g.db")));
        assert!(!options.overflow_enabled);
        assert_eq!(options.heap_threshold, 0.5);
        assert_eq!(options.monitor_interval, Duration::from_millis(20));
        assert_eq!(options.eviction_batch_size, DEFAULT_EVICTION_BATCH_SIZE);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GraphOptions::from_toml_str("page_size = 4096").unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        assert!(GraphOptions::new().heap_threshold(1.5).validate().is_err());
        assert!(GraphOptions::new().heap_threshold(0.0).validate().is_err());
        assert!(GraphOptions::new().eviction_batch_size(0).validate().is_err());
        assert!(GraphOptions::new().memory_budget_bytes(0).validate().is_err());
    }
}
