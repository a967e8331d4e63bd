//! Edge views.
//!
//! Edges are not stored objects. An edge lives as one stride in each of its
//! endpoints' adjacency arrays and is identified by the outgoing endpoint, the
//! edge label and the stride index inside that endpoint's block.

use std::fmt;
use std::sync::Arc;

use crate::types::{Direction, NodeId};

use super::node::NodeHandle;

/// One live stride of a node's adjacency, as seen from that node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeSlot {
    /// Block direction relative to the owning node.
    pub direction: Direction,
    /// Edge label.
    pub label: Arc<str>,
    /// Stride index within the block, holes included.
    pub index: usize,
    /// The node at the other end.
    pub neighbor: NodeId,
}

/// Transient view of an edge between two nodes.
///
/// `index` addresses the stride inside the source node's outgoing block for
/// `label`. The view is invalidated by [`crate::Graph::trim`] on the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Outgoing endpoint.
    pub src: NodeHandle,
    /// Incoming endpoint.
    pub dst: NodeHandle,
    /// Edge label.
    pub label: Arc<str>,
    /// Stride index in the source's outgoing block.
    pub index: usize,
}

impl Edge {
    /// The endpoint opposite to `node`, if `node` is one of the endpoints.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if self.src.id() == node {
            Some(self.dst.id())
        } else if self.dst.id() == node {
            Some(self.src.id())
        } else {
            None
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({})-[{}#{}]->({})",
            self.src.id(),
            self.label,
            self.index,
            self.dst.id()
        )
    }
}
