use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::storage::node::{NodeBody, NodeHandle};
use crate::storage::types::Value;
use crate::types::{Direction, NodeId};

use super::arena::NodeSlot;
use super::Graph;

impl Graph {
    /// Creates a node with the next free id.
    ///
    /// Blocks while an eviction batch is in flight. Fails with
    /// [`GraphError::SchemaViolation`] on an unknown label or undeclared
    /// property, before anything is created.
    pub fn add_node(&self, label: &str, props: &[(&str, Value)]) -> Result<NodeHandle> {
        self.ensure_open()?;
        let layout = self.registry.require(label)?;
        let id = NodeId(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.insert_node(NodeBody::new(id, Arc::clone(layout)), props)
    }

    /// Creates a node with a caller-chosen id. Later generated ids start past it.
    pub fn add_node_with_id(
        &self,
        id: NodeId,
        label: &str,
        props: &[(&str, Value)],
    ) -> Result<NodeHandle> {
        self.ensure_open()?;
        if id.0 >= i64::MAX as u64 {
            return Err(GraphError::Invalid("node id exceeds storage range"));
        }
        let layout = self.registry.require(label)?;
        if self.arena.contains(id) {
            return Err(GraphError::Invalid("node id already in use"));
        }
        self.next_id.fetch_max(id.0 + 1, Ordering::AcqRel);
        self.insert_node(NodeBody::new(id, Arc::clone(layout)), props)
    }

    fn insert_node(&self, mut body: NodeBody, props: &[(&str, Value)]) -> Result<NodeHandle> {
        for (key, value) in props {
            body.set_property(key, value.clone())?;
        }
        self.refs.apply_backpressure();
        let handle = body.handle();
        let bytes = body.approx_bytes();
        let slot = self.arena.insert(NodeSlot::resident(body, bytes))?;
        let indexed = match slot.body.lock().as_ref() {
            Some(body) => self.index.on_insert(handle.id(), body.properties()),
            None => Ok(()),
        };
        if let Err(err) = indexed {
            self.arena.unlink(handle.id());
            if let Err(cleanup) = self.index.on_remove_node(handle.id()) {
                warn!(node = handle.id().0, error = %cleanup, "graph.add_node.index_cleanup_failed");
            }
            return Err(err);
        }
        self.refs.register(handle.id(), bytes);
        self.metrics.node_created();
        Ok(handle)
    }

    /// Removes a node, every edge touching it and its index entries.
    pub fn remove_node(&self, handle: NodeHandle) -> Result<()> {
        let id = handle.id();
        let mut incident: Vec<(Direction, Arc<str>, NodeId)> = Vec::new();
        let mut edge_count = 0usize;
        self.with_body(handle, |body| {
            let mut seen = FxHashSet::default();
            for direction in [Direction::Out, Direction::In] {
                for edge in body.edges(direction, None) {
                    if edge.neighbor == id {
                        if direction == Direction::Out {
                            edge_count += 1;
                        }
                        continue;
                    }
                    edge_count += 1;
                    if seen.insert((direction, Arc::clone(&edge.label), edge.neighbor)) {
                        incident.push((direction, edge.label, edge.neighbor));
                    }
                }
            }
            Ok(())
        })?;

        for (direction, label, neighbor) in incident {
            let neighbor_handle = self.arena.slot(neighbor)?.handle;
            self.with_body(neighbor_handle, |body| {
                let reverse = direction.reverse();
                let holes: Vec<usize> = body
                    .edges(reverse, Some(&label))
                    .filter(|edge| edge.neighbor == id)
                    .map(|edge| edge.index)
                    .collect();
                for index in holes {
                    body.remove_edge_at(reverse, &label, index)?;
                }
                Ok(())
            })?;
        }

        self.index.on_remove_node(id)?;
        let slot = self.arena.slot(id)?;
        {
            let mut guard = slot.body.lock();
            slot.removed.store(true, Ordering::Release);
            *guard = None;
        }
        self.arena.release(&slot);
        self.store.remove(id)?;
        self.arena.unlink(id);
        for _ in 0..edge_count {
            self.metrics.edge_removed();
        }
        self.metrics.node_removed();
        debug!(node = id.0, edges = edge_count, "graph.remove_node");
        Ok(())
    }

    /// Handle of the node with `id`, if it exists.
    pub fn node(&self, id: NodeId) -> Option<NodeHandle> {
        self.arena.slot(id).ok().map(|slot| slot.handle)
    }

    /// Handles of every node, ordered by id.
    pub fn nodes(&self) -> Vec<NodeHandle> {
        self.arena.handles()
    }

    /// Handles of every node with `label`, ordered by id.
    pub fn nodes_by_label(&self, label: &str) -> Result<Vec<NodeHandle>> {
        let label_id = self.registry.require(label)?.label_id();
        Ok(self
            .arena
            .handles()
            .into_iter()
            .filter(|handle| handle.label() == label_id)
            .collect())
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Label name of a node.
    pub fn label(&self, handle: NodeHandle) -> Result<&str> {
        self.registry
            .get(handle.label())
            .map(|layout| layout.label())
            .ok_or(GraphError::NodeNotFound(handle.id()))
    }

    /// Compacts the node's adjacency, dropping holes left by removed edges.
    /// Edge views of this node taken before the call are invalidated.
    pub fn trim(&self, handle: NodeHandle) -> Result<()> {
        let slot = self.arena.slot(handle.id())?;
        self.with_body(handle, |body| {
            if body.has_holes() {
                *body = body.trim();
                self.arena.recharge(&slot, body.approx_bytes());
            }
            Ok(())
        })
    }
}
