//! Per-label node layouts: edge block slots and edge property stride offsets.
//!
//! A [`NodeLayout`] is built once per node label and shared by every node of
//! that label. Slot and offset assignment only depends on sorted label and key
//! names, so two layouts built from the same schema in different processes
//! agree, which keeps stored offset arrays meaningful across restarts.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{GraphError, Result};
use crate::types::{Direction, LabelId};

use super::schema::{EdgeSchema, NodeSchema, PropertySpec, Schema};
use super::ser::{ByteReader, ByteWriter};
use super::types::Value;

/// One adjacency block: a (direction, edge label) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotInfo {
    /// Direction of the edges in this block.
    pub direction: Direction,
    /// Edge label of the edges in this block.
    pub label: Arc<str>,
}

#[derive(Clone, Debug)]
struct EdgeLayout {
    keys: Vec<Arc<str>>,
    defaults: FxHashMap<Arc<str>, Value>,
}

/// Immutable per-label schema metadata shared by all nodes of the label.
#[derive(Debug)]
pub struct NodeLayout {
    label: Arc<str>,
    label_id: LabelId,
    properties: Vec<Arc<str>>,
    defaults: FxHashMap<Arc<str>, Value>,
    slots: Vec<SlotInfo>,
    slot_lookup: FxHashMap<Arc<str>, [Option<usize>; 2]>,
    edges: FxHashMap<Arc<str>, EdgeLayout>,
}

impl NodeLayout {
    /// Builds the layout for one node label from its allowed edge descriptors.
    ///
    /// Blocks are ordered by edge label name (outgoing before incoming for the
    /// same label); edge property keys get 1-based stride offsets in
    /// lexicographic order, offset 0 being the adjacent node.
    pub fn build(
        label_id: LabelId,
        label: &str,
        properties: &[PropertySpec],
        out_edges: &[&EdgeSchema],
        in_edges: &[&EdgeSchema],
    ) -> Result<Self> {
        let (properties, defaults) = sorted_keys(label, properties)?;

        let mut pairs: Vec<(Direction, &EdgeSchema)> = out_edges
            .iter()
            .map(|edge| (Direction::Out, *edge))
            .chain(in_edges.iter().map(|edge| (Direction::In, *edge)))
            .collect();
        pairs.sort_by(|a, b| a.1.label.cmp(&b.1.label).then(a.0.cmp(&b.0)));
        pairs.dedup_by(|a, b| a.0 == b.0 && a.1.label == b.1.label);

        let mut slots = Vec::with_capacity(pairs.len());
        let mut slot_lookup: FxHashMap<Arc<str>, [Option<usize>; 2]> = FxHashMap::default();
        let mut edges: FxHashMap<Arc<str>, EdgeLayout> = FxHashMap::default();
        for (index, (direction, edge)) in pairs.into_iter().enumerate() {
            let edge_label: Arc<str> = Arc::from(edge.label.as_str());
            slot_lookup.entry(Arc::clone(&edge_label)).or_insert([None, None])
                [direction.into_u8() as usize] = Some(index);
            if !edges.contains_key(&edge_label) {
                let (keys, defaults) = sorted_keys(&edge.label, &edge.properties)?;
                edges.insert(Arc::clone(&edge_label), EdgeLayout { keys, defaults });
            }
            slots.push(SlotInfo {
                direction,
                label: edge_label,
            });
        }

        Ok(Self {
            label: Arc::from(label),
            label_id,
            properties,
            defaults,
            slots,
            slot_lookup,
            edges,
        })
    }

    /// Node label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shared node label.
    pub fn label_arc(&self) -> &Arc<str> {
        &self.label
    }

    /// Registry position of the label.
    pub fn label_id(&self) -> LabelId {
        self.label_id
    }

    /// Declared node property keys, sorted.
    pub fn property_keys(&self) -> &[Arc<str>] {
        &self.properties
    }

    /// Returns the shared key if `key` is a declared node property.
    pub fn property_key(&self, key: &str) -> Option<&Arc<str>> {
        self.properties
            .binary_search_by(|probe| probe.as_ref().cmp(key))
            .ok()
            .map(|idx| &self.properties[idx])
    }

    /// Configured default for a node property.
    pub fn default_value(&self, key: &str) -> Option<&Value> {
        self.defaults.get(key)
    }

    /// Iterates node property defaults.
    pub fn defaults(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.defaults.iter()
    }

    /// Number of adjacency blocks, i.e. the offset array length.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// All blocks in slot order.
    pub fn slots(&self) -> &[SlotInfo] {
        &self.slots
    }

    /// Block slot for a (direction, edge label) pair, if that edge is allowed.
    pub fn slot(&self, direction: Direction, label: &str) -> Option<usize> {
        self.slot_lookup
            .get(label)
            .and_then(|dirs| dirs[direction.into_u8() as usize])
    }

    /// Property keys of an edge label allowed on this node, sorted.
    pub fn edge_property_keys(&self, label: &str) -> Option<&[Arc<str>]> {
        self.edges.get(label).map(|edge| edge.keys.as_slice())
    }

    /// 1-based offset of `key` within a stride of `label` edges, or `None` if absent.
    pub fn stride_offset(&self, label: &str, key: &str) -> Option<usize> {
        let edge = self.edges.get(label)?;
        edge.keys
            .binary_search_by(|probe| probe.as_ref().cmp(key))
            .ok()
            .map(|idx| idx + 1)
    }

    /// Number of adjacency entries per edge of `label` (neighbor plus properties).
    pub fn stride_size(&self, label: &str) -> usize {
        self.edges
            .get(label)
            .map(|edge| edge.keys.len() + 1)
            .unwrap_or(1)
    }

    /// Configured default of an edge property.
    pub fn edge_default(&self, label: &str, key: &str) -> Option<&Value> {
        self.edges.get(label).and_then(|edge| edge.defaults.get(key))
    }

    /// Descriptor persisted alongside records written under this layout.
    pub fn to_stored(&self) -> StoredLayout {
        StoredLayout {
            properties: self.properties.iter().map(|k| k.to_string()).collect(),
            slots: self
                .slots
                .iter()
                .map(|slot| StoredSlot {
                    direction: slot.direction,
                    label: slot.label.to_string(),
                    keys: self
                        .edge_property_keys(&slot.label)
                        .unwrap_or_default()
                        .iter()
                        .map(|k| k.to_string())
                        .collect(),
                })
                .collect(),
        }
    }
}

fn sorted_keys(
    label: &str,
    specs: &[PropertySpec],
) -> Result<(Vec<Arc<str>>, FxHashMap<Arc<str>, Value>)> {
    let mut keys: Vec<Arc<str>> = specs.iter().map(|s| Arc::from(s.key.as_str())).collect();
    keys.sort();
    if keys.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(GraphError::Config(format!(
            "label '{label}' declares a property twice"
        )));
    }
    let mut defaults = FxHashMap::default();
    for spec in specs {
        if let Some(default) = &spec.default {
            defaults.insert(Arc::from(spec.key.as_str()), default.clone());
        }
    }
    Ok((keys, defaults))
}

/// Registry of node layouts keyed by label, plus the declared edge labels.
#[derive(Debug, Default)]
pub struct LayoutRegistry {
    layouts: Vec<Arc<NodeLayout>>,
    by_label: FxHashMap<Arc<str>, LabelId>,
    edges: FxHashMap<Arc<str>, EdgeSchema>,
}

impl LayoutRegistry {
    /// Builds every node layout of `schema`.
    ///
    /// Fails with [`GraphError::Config`] on duplicate labels or on nodes that
    /// allow an edge label the schema does not declare.
    pub fn from_schema(schema: &Schema) -> Result<Self> {
        let mut edges: FxHashMap<Arc<str>, EdgeSchema> = FxHashMap::default();
        for edge in &schema.edges {
            if edges
                .insert(Arc::from(edge.label.as_str()), edge.clone())
                .is_some()
            {
                return Err(GraphError::Config(format!(
                    "edge label '{}' declared twice",
                    edge.label
                )));
            }
        }

        let mut nodes: Vec<&NodeSchema> = schema.nodes.iter().collect();
        nodes.sort_by(|a, b| a.label.cmp(&b.label));
        let mut layouts = Vec::with_capacity(nodes.len());
        let mut by_label = FxHashMap::default();
        for (index, node) in nodes.into_iter().enumerate() {
            let label_id = LabelId(index as u32);
            let resolve = |labels: &[String]| -> Result<Vec<&EdgeSchema>> {
                labels
                    .iter()
                    .map(|label| {
                        edges.get(label.as_str()).ok_or_else(|| {
                            GraphError::Config(format!(
                                "node label '{}' references undeclared edge label '{label}'",
                                node.label
                            ))
                        })
                    })
                    .collect()
            };
            let out_edges = resolve(&node.out_edges)?;
            let in_edges = resolve(&node.in_edges)?;
            let layout = NodeLayout::build(
                label_id,
                &node.label,
                &node.properties,
                &out_edges,
                &in_edges,
            )?;
            if by_label
                .insert(Arc::clone(layout.label_arc()), label_id)
                .is_some()
            {
                return Err(GraphError::Config(format!(
                    "node label '{}' declared twice",
                    node.label
                )));
            }
            layouts.push(Arc::new(layout));
        }
        Ok(Self {
            layouts,
            by_label,
            edges,
        })
    }

    /// Layout for a registry id.
    pub fn get(&self, id: LabelId) -> Option<&Arc<NodeLayout>> {
        self.layouts.get(id.0 as usize)
    }

    /// Layout for a label name.
    pub fn by_label(&self, label: &str) -> Option<&Arc<NodeLayout>> {
        self.by_label
            .get(label)
            .and_then(|id| self.layouts.get(id.0 as usize))
    }

    /// Layout for a label name, failing with a schema violation when unknown.
    pub fn require(&self, label: &str) -> Result<&Arc<NodeLayout>> {
        self.by_label(label)
            .ok_or_else(|| GraphError::SchemaViolation(format!("unknown node label '{label}'")))
    }

    /// Returns true if `label` is a declared edge label.
    pub fn has_edge_label(&self, label: &str) -> bool {
        self.edges.contains_key(label)
    }

    /// All layouts in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<NodeLayout>> {
        self.layouts.iter()
    }

    /// Number of node labels.
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Returns true if no node labels are registered.
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// One block of a persisted layout descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredSlot {
    /// Block direction.
    pub direction: Direction,
    /// Block edge label.
    pub label: String,
    /// Edge property keys in stride order.
    pub keys: Vec<String>,
}

/// Layout descriptor as written to the store for each node label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredLayout {
    /// Node property keys.
    pub properties: Vec<String>,
    /// Blocks in slot order.
    pub slots: Vec<StoredSlot>,
}

impl StoredLayout {
    /// Serializes the descriptor.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_len(self.properties.len())?;
        for key in &self.properties {
            out.write_str(key)?;
        }
        out.write_len(self.slots.len())?;
        for slot in &self.slots {
            out.write_u8(slot.direction.into_u8());
            out.write_str(&slot.label)?;
            out.write_len(slot.keys.len())?;
            for key in &slot.keys {
                out.write_str(key)?;
            }
        }
        Ok(out)
    }

    /// Parses a descriptor written by [`StoredLayout::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let prop_count = reader.read_len()?;
        let mut properties = Vec::with_capacity(prop_count.min(1024));
        for _ in 0..prop_count {
            properties.push(reader.read_string()?);
        }
        let slot_count = reader.read_len()?;
        let mut slots = Vec::with_capacity(slot_count.min(1024));
        for _ in 0..slot_count {
            let direction = Direction::from_u8(reader.read_u8()?)
                .ok_or(GraphError::Corruption("layout slot direction invalid"))?;
            let label = reader.read_string()?;
            let key_count = reader.read_len()?;
            let mut keys = Vec::with_capacity(key_count.min(1024));
            for _ in 0..key_count {
                keys.push(reader.read_string()?);
            }
            slots.push(StoredSlot {
                direction,
                label,
                keys,
            });
        }
        Ok(Self { properties, slots })
    }
}

/// Mapping from a stored layout to the current one for a single label.
///
/// Only succeeds when the current layout is a superset of the stored one.
#[derive(Clone, Debug)]
pub struct LayoutTranslation {
    slot_map: Vec<usize>,
    old_strides: Vec<usize>,
    prop_maps: Vec<Vec<usize>>,
    identity: bool,
}

impl LayoutTranslation {
    /// Identity translation for records written under `layout` itself.
    pub fn identity(layout: &NodeLayout) -> Self {
        let slot_map = (0..layout.slot_count()).collect();
        let mut old_strides = Vec::with_capacity(layout.slot_count());
        let mut prop_maps = Vec::with_capacity(layout.slot_count());
        for slot in layout.slots() {
            let stride = layout.stride_size(&slot.label);
            old_strides.push(stride);
            prop_maps.push((1..stride).collect());
        }
        Self {
            slot_map,
            old_strides,
            prop_maps,
            identity: true,
        }
    }

    /// Builds the old-slot to current-slot table, failing with
    /// [`GraphError::BackwardCompatibility`] if any stored schema element has
    /// no counterpart in `current`.
    pub fn new(stored: &StoredLayout, current: &NodeLayout) -> Result<Self> {
        for key in &stored.properties {
            if current.property_key(key).is_none() {
                return Err(GraphError::BackwardCompatibility(format!(
                    "stored property '{key}' of label '{}' is not part of the current schema",
                    current.label()
                )));
            }
        }
        let mut slot_map = Vec::with_capacity(stored.slots.len());
        let mut old_strides = Vec::with_capacity(stored.slots.len());
        let mut prop_maps = Vec::with_capacity(stored.slots.len());
        for slot in &stored.slots {
            let new_slot = current.slot(slot.direction, &slot.label).ok_or_else(|| {
                GraphError::BackwardCompatibility(format!(
                    "stored {} edge '{}' of label '{}' is not allowed by the current schema",
                    slot.direction,
                    slot.label,
                    current.label()
                ))
            })?;
            let mut offsets = Vec::with_capacity(slot.keys.len());
            for key in &slot.keys {
                let offset = current.stride_offset(&slot.label, key).ok_or_else(|| {
                    GraphError::BackwardCompatibility(format!(
                        "stored property '{key}' of edge '{}' is not part of the current schema",
                        slot.label
                    ))
                })?;
                offsets.push(offset);
            }
            slot_map.push(new_slot);
            old_strides.push(slot.keys.len() + 1);
            prop_maps.push(offsets);
        }
        let identity = *stored == current.to_stored();
        Ok(Self {
            slot_map,
            old_strides,
            prop_maps,
            identity,
        })
    }

    /// True when stored and current layouts are identical.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Number of blocks in the stored layout.
    pub fn old_slot_count(&self) -> usize {
        self.slot_map.len()
    }

    /// Current slot for a stored slot.
    pub fn map_slot(&self, old_slot: usize) -> usize {
        self.slot_map[old_slot]
    }

    /// Stride size used by records of the stored slot.
    pub fn old_stride(&self, old_slot: usize) -> usize {
        self.old_strides[old_slot]
    }

    /// Current stride offsets of the stored slot's properties, in stored order.
    pub fn prop_offsets(&self, old_slot: usize) -> &[usize] {
        &self.prop_maps[old_slot]
    }
}
