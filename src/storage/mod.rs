//! Graph storage engine and core data structures.
//!
//! Node bodies live in memory in a compact per-label layout and overflow to a
//! SQLite-backed store under memory pressure. The store also holds the string
//! table, per-label layout descriptors and property-value indices.

/// String table mapping labels and property keys to integer ids.
pub mod catalog;

/// Property-value indices layered on the store.
pub mod index;

/// SQLite-backed persistent store.
pub mod store;

mod edge;
mod graph;
mod layout;
mod metrics;
mod node;
mod options;
mod refs;
mod schema;
mod ser;
mod types;

/// Edge views.
pub use edge::{Edge, EdgeSlot};

/// Graph lifecycle and mutation API.
pub use graph::Graph;

/// Per-label layouts and schema evolution.
pub use layout::{LayoutRegistry, LayoutTranslation, NodeLayout, SlotInfo, StoredLayout, StoredSlot};

/// Metrics hooks.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StorageMetrics};

/// Resident node representation.
pub use node::{NodeBody, NodeHandle};

/// Graph configuration options.
pub use options::{
    GraphConfig, GraphOptions, DEFAULT_EVICTION_BATCH_SIZE, DEFAULT_HEAP_THRESHOLD,
    DEFAULT_MEMORY_BUDGET_BYTES, DEFAULT_MONITOR_INTERVAL,
};

/// Eviction machinery.
pub use refs::{
    CandidateQueue, EvictionConfig, EvictionReport, Evictable, ReferenceManager, ResidentBudget,
};

/// Schema descriptors.
pub use schema::{EdgeSchema, NodeSchema, PropertySpec, Schema};

/// Node codec.
pub use ser::{decode_value, encode_value, Codec};

/// Typed property values.
pub use types::*;
