//! Resident node representation.
//!
//! A [`NodeBody`] holds a node's property map plus its adjacency packed as one
//! flat array. The array is split into one block per layout slot; the offset
//! array stores the exclusive end of each block. Each edge occupies one stride
//! inside its block: the neighbor id followed by the edge's properties in
//! stride-offset order. Removing an edge overwrites its stride with nulls
//! (a hole) and leaves every other position untouched.

use std::mem;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{GraphError, Result};
use crate::primitives::packed::PackedOffsetArray;
use crate::types::{Direction, LabelId, NodeId};

use super::edge::EdgeSlot;
use super::layout::NodeLayout;
use super::types::Value;

/// Copyable reference to a node that survives eviction of its body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    id: NodeId,
    label: LabelId,
}

impl NodeHandle {
    /// Creates a handle.
    pub fn new(id: NodeId, label: LabelId) -> Self {
        Self { id, label }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Registry id of the node's label.
    pub fn label(&self) -> LabelId {
        self.label
    }
}

/// Compact resident body of one node.
#[derive(Debug)]
pub struct NodeBody {
    id: NodeId,
    layout: Arc<NodeLayout>,
    props: FxHashMap<Arc<str>, Value>,
    offsets: PackedOffsetArray,
    adjacency: Vec<Value>,
    dirty: AtomicBool,
}

impl NodeBody {
    /// Creates an empty, dirty body with the label's property defaults applied.
    pub fn new(id: NodeId, layout: Arc<NodeLayout>) -> Self {
        let props = layout
            .defaults()
            .map(|(key, value)| (Arc::clone(key), value.clone()))
            .collect();
        let offsets = PackedOffsetArray::new(layout.slot_count());
        Self {
            id,
            layout,
            props,
            offsets,
            adjacency: Vec::new(),
            dirty: AtomicBool::new(true),
        }
    }

    pub(crate) fn from_parts(
        id: NodeId,
        layout: Arc<NodeLayout>,
        props: FxHashMap<Arc<str>, Value>,
        offsets: PackedOffsetArray,
        adjacency: Vec<Value>,
    ) -> Self {
        Self {
            id,
            layout,
            props,
            offsets,
            adjacency,
            dirty: AtomicBool::new(true),
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Shared layout of the node's label.
    pub fn layout(&self) -> &Arc<NodeLayout> {
        &self.layout
    }

    /// Node label.
    pub fn label(&self) -> &str {
        self.layout.label()
    }

    /// Handle for this body.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.id, self.layout.label_id())
    }

    /// Current property values, defaults included.
    pub fn properties(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.props.iter()
    }

    /// Block end offsets, one per layout slot.
    pub fn offsets(&self) -> &PackedOffsetArray {
        &self.offsets
    }

    /// Flat adjacency array, holes included.
    pub fn adjacency(&self) -> &[Value] {
        &self.adjacency
    }

    /// Returns true when the body holds changes not yet written to the store.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Marks the body as matching its stored bytes.
    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Marks the body as changed since it was last written.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn declared_key(&self, key: &str) -> Result<Arc<str>> {
        self.layout.property_key(key).cloned().ok_or_else(|| {
            GraphError::SchemaViolation(format!(
                "property '{key}' is not declared for label '{}'",
                self.layout.label()
            ))
        })
    }

    /// Value of `key`, or its default when unset.
    pub fn property(&self, key: &str) -> Result<Option<&Value>> {
        let key = self.declared_key(key)?;
        Ok(self.props.get(&key))
    }

    /// Sets `key`, returning the previous value.
    pub fn set_property(&mut self, key: &str, value: Value) -> Result<Option<Value>> {
        let key = self.declared_key(key)?;
        let previous = self.props.insert(key, value);
        self.mark_dirty();
        Ok(previous)
    }

    /// Unsets `key`, returning the previous value. The default, if any, takes its place.
    pub fn remove_property(&mut self, key: &str) -> Result<Option<Value>> {
        let key = self.declared_key(key)?;
        let previous = match self.layout.default_value(&key) {
            Some(default) => self.props.insert(key, default.clone()),
            None => self.props.remove(&key),
        };
        self.mark_dirty();
        Ok(previous)
    }

    fn require_slot(&self, direction: Direction, label: &str) -> Result<usize> {
        self.layout.slot(direction, label).ok_or_else(|| {
            GraphError::SchemaViolation(format!(
                "{direction} edge '{label}' is not allowed for label '{}'",
                self.layout.label()
            ))
        })
    }

    fn block_range(&self, slot: usize) -> Range<usize> {
        let start = if slot == 0 {
            0
        } else {
            self.offsets.get(slot - 1) as usize
        };
        start..self.offsets.get(slot) as usize
    }

    fn stride_position(&self, slot: usize, label: &str, index: usize) -> Option<usize> {
        let range = self.block_range(slot);
        let pos = range.start + index * self.layout.stride_size(label);
        (pos < range.end).then_some(pos)
    }

    /// Appends an edge stride to the block of (`direction`, `label`) and
    /// returns its stride index. Later blocks shift right by one stride.
    pub fn add_edge(
        &mut self,
        direction: Direction,
        label: &str,
        other: NodeId,
        props: &[(&str, Value)],
    ) -> Result<usize> {
        let slot = self.require_slot(direction, label)?;
        let stride = self.layout.stride_size(label);
        let mut entry = vec![Value::Null; stride];
        entry[0] = Value::NodeRef(other);
        if let Some(keys) = self.layout.edge_property_keys(label) {
            for (idx, key) in keys.iter().enumerate() {
                if let Some(default) = self.layout.edge_default(label, key) {
                    entry[idx + 1] = default.clone();
                }
            }
        }
        for (key, value) in props {
            let offset = self.edge_offset(label, key)?;
            entry[offset] = value.clone();
        }

        let range = self.block_range(slot);
        let index = (range.end - range.start) / stride;
        let grow = u32::try_from(stride)
            .map_err(|_| GraphError::Invalid("edge stride exceeds u32"))?;
        if self.adjacency.len() + stride > u32::MAX as usize {
            return Err(GraphError::Invalid("adjacency exceeds u32 offsets"));
        }
        self.adjacency.splice(range.end..range.end, entry);
        self.offsets.add_from(slot, grow);
        self.mark_dirty();
        Ok(index)
    }

    fn edge_offset(&self, label: &str, key: &str) -> Result<usize> {
        self.layout.stride_offset(label, key).ok_or_else(|| {
            GraphError::SchemaViolation(format!(
                "property '{key}' is not declared for edge '{label}'"
            ))
        })
    }

    /// Turns the edge stride at `index` into a hole. Returns false if it
    /// already was one or does not exist.
    pub fn remove_edge_at(&mut self, direction: Direction, label: &str, index: usize) -> Result<bool> {
        let slot = self.require_slot(direction, label)?;
        let Some(pos) = self.stride_position(slot, label, index) else {
            return Ok(false);
        };
        if self.adjacency[pos].is_null() {
            return Ok(false);
        }
        let stride = self.layout.stride_size(label);
        self.adjacency[pos..pos + stride].fill(Value::Null);
        self.mark_dirty();
        Ok(true)
    }

    /// Neighbor of the live edge at `index`, if any.
    pub fn neighbor_at(&self, direction: Direction, label: &str, index: usize) -> Option<NodeId> {
        let slot = self.layout.slot(direction, label)?;
        let pos = self.stride_position(slot, label, index)?;
        self.adjacency[pos].as_node_ref()
    }

    /// Live edges of this node, lazily. `label = None` walks every block of
    /// the direction in slot order.
    pub fn edges<'a>(
        &'a self,
        direction: Direction,
        label: Option<&'a str>,
    ) -> impl Iterator<Item = EdgeSlot> + 'a {
        self.layout
            .slots()
            .iter()
            .enumerate()
            .filter(move |(_, info)| {
                info.direction == direction && label.map_or(true, |l| *info.label == *l)
            })
            .flat_map(move |(slot, info)| {
                let range = self.block_range(slot);
                let stride = self.layout.stride_size(&info.label);
                range
                    .step_by(stride)
                    .enumerate()
                    .filter_map(move |(index, pos)| {
                        self.adjacency[pos].as_node_ref().map(|neighbor| EdgeSlot {
                            direction,
                            label: Arc::clone(&info.label),
                            index,
                            neighbor,
                        })
                    })
            })
    }

    /// Number of live edges in the given direction.
    pub fn degree(&self, direction: Direction, label: Option<&str>) -> usize {
        self.edges(direction, label).count()
    }

    /// Value of edge property `key` at `index`. `Ok(None)` for holes and
    /// missing strides.
    pub fn edge_property(
        &self,
        direction: Direction,
        label: &str,
        index: usize,
        key: &str,
    ) -> Result<Option<&Value>> {
        let slot = self.require_slot(direction, label)?;
        let offset = self.edge_offset(label, key)?;
        let Some(pos) = self.stride_position(slot, label, index) else {
            return Ok(None);
        };
        if self.adjacency[pos].is_null() {
            return Ok(None);
        }
        Ok(Some(&self.adjacency[pos + offset]))
    }

    /// Sets edge property `key` at `index`, returning the previous value.
    pub fn set_edge_property(
        &mut self,
        direction: Direction,
        label: &str,
        index: usize,
        key: &str,
        value: Value,
    ) -> Result<Value> {
        let slot = self.require_slot(direction, label)?;
        let offset = self.edge_offset(label, key)?;
        let pos = self
            .stride_position(slot, label, index)
            .filter(|pos| !self.adjacency[*pos].is_null())
            .ok_or(GraphError::Invalid("edge does not exist"))?;
        let previous = mem::replace(&mut self.adjacency[pos + offset], value);
        self.mark_dirty();
        Ok(previous)
    }

    /// How many live edges to `neighbor` precede `index` in the block.
    ///
    /// Both endpoints append an edge's strides at the same time, so the n-th
    /// stride pointing at B in A's outgoing block pairs with the n-th stride
    /// pointing at A in B's incoming block.
    pub fn occurrence_of(&self, direction: Direction, label: &str, index: usize) -> Option<usize> {
        let neighbor = self.neighbor_at(direction, label, index)?;
        Some(
            self.edges(direction, Some(label))
                .take_while(|edge| edge.index < index)
                .filter(|edge| edge.neighbor == neighbor)
                .count(),
        )
    }

    /// Stride index of the `occurrence`-th live edge to `neighbor`.
    pub fn index_of_occurrence(
        &self,
        direction: Direction,
        label: &str,
        neighbor: NodeId,
        occurrence: usize,
    ) -> Option<usize> {
        self.edges(direction, Some(label))
            .filter(|edge| edge.neighbor == neighbor)
            .nth(occurrence)
            .map(|edge| edge.index)
    }

    /// Returns true if any block contains a hole.
    pub fn has_holes(&self) -> bool {
        self.layout.slots().iter().enumerate().any(|(slot, info)| {
            let stride = self.layout.stride_size(&info.label);
            self.block_range(slot)
                .step_by(stride)
                .any(|pos| self.adjacency[pos].is_null())
        })
    }

    /// Rebuilds the body without holes, keeping live edges in block order.
    pub fn trim(&self) -> NodeBody {
        let mut offsets = PackedOffsetArray::new(self.layout.slot_count());
        let mut adjacency = Vec::with_capacity(self.adjacency.len());
        for (slot, info) in self.layout.slots().iter().enumerate() {
            let stride = self.layout.stride_size(&info.label);
            for pos in self.block_range(slot).step_by(stride) {
                if !self.adjacency[pos].is_null() {
                    adjacency.extend_from_slice(&self.adjacency[pos..pos + stride]);
                }
            }
            offsets.set(slot, adjacency.len() as u32);
        }
        adjacency.shrink_to_fit();
        NodeBody {
            id: self.id,
            layout: Arc::clone(&self.layout),
            props: self.props.clone(),
            offsets: offsets.compact(),
            adjacency,
            dirty: AtomicBool::new(true),
        }
    }

    /// Approximate resident footprint in bytes.
    pub fn approx_bytes(&self) -> usize {
        let props: usize = self
            .props
            .values()
            .map(|value| mem::size_of::<(Arc<str>, Value)>() + value.heap_bytes())
            .sum();
        let adjacency: usize = self.adjacency.iter().map(Value::heap_bytes).sum::<usize>()
            + self.adjacency.capacity() * mem::size_of::<Value>();
        mem::size_of::<Self>() + props + self.offsets.heap_bytes() + adjacency
    }
}
