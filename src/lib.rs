//! Spillgraph: an embedded property graph that keeps node bodies in a compact
//! per-label layout and spills the coldest ones to disk under memory pressure.
//!
//! ```no_run
//! use spillgraph::{EdgeSchema, Graph, GraphOptions, NodeSchema, Schema, Value};
//!
//! # fn main() -> spillgraph::Result<()> {
//! let schema = Schema::new()
//!     .node(NodeSchema::new("Person").property("name").out_edge("Knows").in_edge("Knows"))
//!     .edge(EdgeSchema::new("Knows").property("since"));
//! let graph = Graph::open(&schema, GraphOptions::new().storage_path("people.db"))?;
//! let ada = graph.add_node("Person", &[("name", Value::from("Ada"))])?;
//! let bob = graph.add_node("Person", &[("name", Value::from("Bob"))])?;
//! graph.add_edge("Knows", ada, bob, &[("since", Value::I32(1843))])?;
//! graph.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use error::{GraphError, Result};
pub use storage::{
    CounterMetrics, Edge, EdgeSchema, Graph, GraphConfig, GraphOptions, NodeHandle, NodeSchema,
    NoopMetrics, PropertySpec, Schema, StorageMetrics, Value,
};
pub use types::{Direction, LabelId, NodeId, StrId};
