use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::{GraphError, Result};
use crate::storage::edge::Edge;
use crate::storage::node::NodeHandle;
use crate::storage::types::Value;
use crate::types::{Direction, NodeId};

use super::Graph;

impl Graph {
    /// Adds an edge `src -[label]-> dst` with the given properties.
    ///
    /// Both endpoints get a stride, so the edge is visible from either side.
    /// Fails with [`GraphError::SchemaViolation`] before touching either node
    /// when the label, a property or one of the directions is not allowed.
    pub fn add_edge(
        &self,
        label: &str,
        src: NodeHandle,
        dst: NodeHandle,
        props: &[(&str, Value)],
    ) -> Result<Edge> {
        self.ensure_open()?;
        let label_arc = self.check_edge(label, src, dst, props)?;
        let index = self.with_body(src, |body| body.add_edge(Direction::Out, label, dst.id(), props))?;
        let added = self.with_body(dst, |body| body.add_edge(Direction::In, label, src.id(), props));
        if let Err(err) = added {
            let undo = self.with_body(src, |body| body.remove_edge_at(Direction::Out, label, index));
            if let Err(rollback) = undo {
                warn!(
                    src = src.id().0,
                    dst = dst.id().0,
                    label,
                    index,
                    error = %rollback,
                    "graph.add_edge.rollback_failed"
                );
            }
            return Err(err);
        }
        self.metrics.edge_created();
        trace!(src = src.id().0, dst = dst.id().0, label, index, "graph.add_edge");
        Ok(Edge {
            src,
            dst,
            label: label_arc,
            index,
        })
    }

    fn check_edge(
        &self,
        label: &str,
        src: NodeHandle,
        dst: NodeHandle,
        props: &[(&str, Value)],
    ) -> Result<Arc<str>> {
        if !self.registry.has_edge_label(label) {
            return Err(GraphError::SchemaViolation(format!(
                "unknown edge label '{label}'"
            )));
        }
        let mut label_arc = None;
        for (handle, direction) in [(src, Direction::Out), (dst, Direction::In)] {
            if !self.arena.contains(handle.id()) {
                return Err(GraphError::NodeNotFound(handle.id()));
            }
            let layout = self
                .registry
                .get(handle.label())
                .ok_or(GraphError::NodeNotFound(handle.id()))?;
            let slot = layout.slot(direction, label).ok_or_else(|| {
                GraphError::SchemaViolation(format!(
                    "{direction} edge '{label}' is not allowed for label '{}'",
                    layout.label()
                ))
            })?;
            for (key, _) in props {
                if layout.stride_offset(label, key).is_none() {
                    return Err(GraphError::SchemaViolation(format!(
                        "property '{key}' is not declared for edge '{label}'"
                    )));
                }
            }
            label_arc.get_or_insert_with(|| Arc::clone(&layout.slots()[slot].label));
        }
        label_arc.ok_or(GraphError::Invalid("edge endpoints missing"))
    }

    /// Removes an edge from both endpoints. Returns false if it was already gone.
    pub fn remove_edge(&self, edge: &Edge) -> Result<bool> {
        let label = edge.label.as_ref();
        let dst_id = edge.dst.id();
        let occurrence = self.with_body(edge.src, |body| {
            if body.neighbor_at(Direction::Out, label, edge.index) != Some(dst_id) {
                return Ok(None);
            }
            let occurrence = body.occurrence_of(Direction::Out, label, edge.index);
            body.remove_edge_at(Direction::Out, label, edge.index)?;
            Ok(occurrence)
        })?;
        let Some(occurrence) = occurrence else {
            return Ok(false);
        };
        let src_id = edge.src.id();
        self.with_body(edge.dst, |body| {
            match body.index_of_occurrence(Direction::In, label, src_id, occurrence) {
                Some(index) => body.remove_edge_at(Direction::In, label, index).map(|_| ()),
                None => Err(GraphError::Corruption("edge missing on incoming endpoint")),
            }
        })?;
        self.metrics.edge_removed();
        trace!(edge = %edge, "graph.remove_edge");
        Ok(true)
    }

    /// Edges of a node in one direction, optionally restricted to one label.
    pub fn edges(
        &self,
        handle: NodeHandle,
        direction: Direction,
        label: Option<&str>,
    ) -> Result<Vec<Edge>> {
        let slots = self.with_body(handle, |body| {
            Ok(body
                .edges(direction, label)
                .map(|slot| {
                    let occurrence = match direction {
                        Direction::Out => 0,
                        Direction::In => body
                            .occurrence_of(direction, &slot.label, slot.index)
                            .unwrap_or(0),
                    };
                    (slot, occurrence)
                })
                .collect::<Vec<_>>())
        })?;
        let mut edges = Vec::with_capacity(slots.len());
        for (slot, occurrence) in slots {
            let neighbor = self.handle_of(slot.neighbor)?;
            let edge = match direction {
                Direction::Out => Edge {
                    src: handle,
                    dst: neighbor,
                    label: slot.label,
                    index: slot.index,
                },
                Direction::In => {
                    let index = self.with_body(neighbor, |body| {
                        body.index_of_occurrence(Direction::Out, &slot.label, handle.id(), occurrence)
                            .ok_or(GraphError::Corruption("edge missing on outgoing endpoint"))
                    })?;
                    Edge {
                        src: neighbor,
                        dst: handle,
                        label: slot.label,
                        index,
                    }
                }
            };
            edges.push(edge);
        }
        Ok(edges)
    }

    /// Adjacent nodes in one direction, one entry per edge.
    pub fn neighbors(
        &self,
        handle: NodeHandle,
        direction: Direction,
        label: Option<&str>,
    ) -> Result<Vec<NodeHandle>> {
        let ids: Vec<NodeId> = self.with_body(handle, |body| {
            Ok(body.edges(direction, label).map(|slot| slot.neighbor).collect())
        })?;
        ids.into_iter().map(|id| self.handle_of(id)).collect()
    }

    /// Number of edges of a node in one direction.
    pub fn degree(
        &self,
        handle: NodeHandle,
        direction: Direction,
        label: Option<&str>,
    ) -> Result<usize> {
        self.with_body(handle, |body| Ok(body.degree(direction, label)))
    }

    /// Total number of live edges. Evicted nodes are decoded without being
    /// made resident.
    pub fn edge_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for handle in self.nodes() {
            total += self.read_body(handle, |body| Ok(body.degree(Direction::Out, None)))? as u64;
        }
        Ok(total)
    }

    /// Value of an edge property; `None` if the edge is gone.
    pub fn edge_property(&self, edge: &Edge, key: &str) -> Result<Option<Value>> {
        self.with_body(edge.src, |body| {
            if body.neighbor_at(Direction::Out, &edge.label, edge.index) != Some(edge.dst.id()) {
                return Ok(None);
            }
            Ok(body
                .edge_property(Direction::Out, &edge.label, edge.index, key)?
                .cloned())
        })
    }

    /// Sets an edge property on both endpoints, returning the previous value.
    pub fn set_edge_property(&self, edge: &Edge, key: &str, value: Value) -> Result<Value> {
        let label = edge.label.as_ref();
        let dst_id = edge.dst.id();
        let (previous, occurrence) = self.with_body(edge.src, |body| {
            if body.neighbor_at(Direction::Out, label, edge.index) != Some(dst_id) {
                return Err(GraphError::Invalid("edge does not exist"));
            }
            let occurrence = body
                .occurrence_of(Direction::Out, label, edge.index)
                .ok_or(GraphError::Invalid("edge does not exist"))?;
            let previous =
                body.set_edge_property(Direction::Out, label, edge.index, key, value.clone())?;
            Ok((previous, occurrence))
        })?;
        let src_id = edge.src.id();
        self.with_body(edge.dst, |body| {
            let index = body
                .index_of_occurrence(Direction::In, label, src_id, occurrence)
                .ok_or(GraphError::Corruption("edge missing on incoming endpoint"))?;
            body.set_edge_property(Direction::In, label, index, key, value)
                .map(|_| ())
        })?;
        Ok(previous)
    }

    pub(crate) fn handle_of(&self, id: NodeId) -> Result<NodeHandle> {
        self.arena
            .slot(id)
            .map(|slot| slot.handle)
            .map_err(|_| GraphError::Corruption("edge points at a missing node"))
    }
}
