//! Binary node codec.
//!
//! Record layout (big-endian):
//!
//! ```text
//! [id:i64][labelId:i32]
//! [propCount:u32]{[key:u32][TypedValue]}*
//! [offsetCount:u32]{[offset:i32]}*
//! [adjCount:u32]{[TypedValue]}*
//! ```
//!
//! Label and property key names are stored as string table ids. Every value
//! carries an explicit type tag so declared numeric widths round-trip.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BufMut};
use rustc_hash::FxHashMap;

use crate::error::{GraphError, Result};
use crate::primitives::intern::intern;
use crate::primitives::packed::PackedOffsetArray;
use crate::types::{NodeId, StrId};

use super::catalog::StringTable;
use super::layout::{LayoutRegistry, LayoutTranslation, NodeLayout};
use super::metrics::StorageMetrics;
use super::node::{NodeBody, NodeHandle};
use super::types::*;

const MAX_NESTING: usize = 64;

/// Append-only big-endian writer helpers.
pub(crate) trait ByteWriter {
    fn write_u8(&mut self, value: u8);
    fn write_u32(&mut self, value: u32);
    fn write_i32(&mut self, value: i32);
    fn write_i64(&mut self, value: i64);
    fn write_len(&mut self, len: usize) -> Result<()>;
    fn write_str(&mut self, value: &str) -> Result<()>;
}

impl ByteWriter for Vec<u8> {
    fn write_u8(&mut self, value: u8) {
        self.put_u8(value);
    }

    fn write_u32(&mut self, value: u32) {
        self.put_u32(value);
    }

    fn write_i32(&mut self, value: i32) {
        self.put_i32(value);
    }

    fn write_i64(&mut self, value: i64) {
        self.put_i64(value);
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| GraphError::Serialization(format!("length {len} exceeds u32")))?;
        self.put_u32(len);
        Ok(())
    }

    fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_len(value.len())?;
        self.put_slice(value.as_bytes());
        Ok(())
    }
}

/// Bounds-checked big-endian reader over a byte slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(GraphError::Corruption("node record truncated"));
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn read_i8(&mut self) -> Result<i8> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    fn read_char(&mut self) -> Result<char> {
        char::from_u32(self.read_u32()?).ok_or(GraphError::Corruption("invalid char payload"))
    }

    /// Reads a u32 element count, rejecting counts that cannot fit in the
    /// remaining bytes at `min_elem` bytes each.
    fn read_count(&mut self, min_elem: usize) -> Result<usize> {
        let count = self.read_u32()? as usize;
        if count.saturating_mul(min_elem) > self.remaining() {
            return Err(GraphError::Corruption("element count exceeds record"));
        }
        Ok(count)
    }

    pub(crate) fn read_len(&mut self) -> Result<usize> {
        self.read_count(0)
    }

    fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| GraphError::Corruption("stored string not utf8"))
    }

    pub(crate) fn read_string(&mut self) -> Result<String> {
        self.read_str().map(str::to_owned)
    }
}

/// Appends the tagged encoding of `value`.
pub fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    write_value_nested(out, value, 0)
}

/// Encodes a single value on its own, as used for index keys.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    write_value(&mut out, value)?;
    Ok(out)
}

/// Decodes a single value written by [`encode_value`].
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let mut reader = ByteReader::new(bytes);
    let value = read_value(&mut reader, 0)?;
    if reader.remaining() != 0 {
        return Err(GraphError::Corruption("trailing bytes after value"));
    }
    Ok(value)
}

fn write_value_nested(out: &mut Vec<u8>, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_NESTING {
        return Err(GraphError::Serialization(
            "value nesting exceeds limit".into(),
        ));
    }
    out.write_u8(value.type_tag());
    match value {
        Value::Null => {}
        Value::Bool(v) => out.put_u8(u8::from(*v)),
        Value::Str(s) => out.write_str(s)?,
        Value::I8(v) => out.put_i8(*v),
        Value::I16(v) => out.put_i16(*v),
        Value::I32(v) => out.put_i32(*v),
        Value::I64(v) => out.put_i64(*v),
        Value::F32(v) => out.put_f32(*v),
        Value::F64(v) => out.put_f64(*v),
        Value::Char(v) => out.put_u32(*v as u32),
        Value::NodeRef(id) => out.put_i64(node_id_to_i64(*id)?),
        Value::List(items) | Value::Array(items) => {
            out.write_len(items.len())?;
            for item in items {
                write_value_nested(out, item, depth + 1)?;
            }
        }
        Value::BoolArray(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|b| out.put_u8(u8::from(*b)));
        }
        Value::I8Array(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|x| out.put_i8(*x));
        }
        Value::I16Array(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|x| out.put_i16(*x));
        }
        Value::I32Array(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|x| out.put_i32(*x));
        }
        Value::I64Array(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|x| out.put_i64(*x));
        }
        Value::F32Array(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|x| out.put_f32(*x));
        }
        Value::F64Array(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|x| out.put_f64(*x));
        }
        Value::CharArray(v) => {
            out.write_len(v.len())?;
            v.iter().for_each(|c| out.put_u32(*c as u32));
        }
    }
    Ok(())
}

fn read_value(reader: &mut ByteReader<'_>, depth: usize) -> Result<Value> {
    if depth > MAX_NESTING {
        return Err(GraphError::Corruption("value nesting exceeds limit"));
    }
    let tag = reader.read_u8()?;
    let value = match tag {
        TYPE_NULL => Value::Null,
        TYPE_BOOL => match reader.read_u8()? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            _ => return Err(GraphError::Corruption("bool payload invalid")),
        },
        TYPE_STR => Value::Str(intern(reader.read_str()?)),
        TYPE_I8 => Value::I8(reader.read_i8()?),
        TYPE_I16 => Value::I16(reader.read_i16()?),
        TYPE_I32 => Value::I32(reader.read_i32()?),
        TYPE_I64 => Value::I64(reader.read_i64()?),
        TYPE_F32 => Value::F32(reader.read_f32()?),
        TYPE_F64 => Value::F64(reader.read_f64()?),
        TYPE_CHAR => Value::Char(reader.read_char()?),
        TYPE_NODE_REF => Value::NodeRef(node_id_from_i64(reader.read_i64()?)?),
        TYPE_LIST | TYPE_ARRAY_OBJECT => {
            let count = reader.read_count(1)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_value(reader, depth + 1)?);
            }
            if tag == TYPE_LIST {
                Value::List(items)
            } else {
                Value::Array(items)
            }
        }
        TYPE_ARRAY_BOOL => {
            let count = reader.read_count(1)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.read_u8()? != 0);
            }
            Value::BoolArray(items)
        }
        TYPE_ARRAY_I8 => Value::I8Array(read_array(reader, 1, ByteReader::read_i8)?),
        TYPE_ARRAY_I16 => Value::I16Array(read_array(reader, 2, ByteReader::read_i16)?),
        TYPE_ARRAY_I32 => Value::I32Array(read_array(reader, 4, ByteReader::read_i32)?),
        TYPE_ARRAY_I64 => Value::I64Array(read_array(reader, 8, ByteReader::read_i64)?),
        TYPE_ARRAY_F32 => Value::F32Array(read_array(reader, 4, ByteReader::read_f32)?),
        TYPE_ARRAY_F64 => Value::F64Array(read_array(reader, 8, ByteReader::read_f64)?),
        TYPE_ARRAY_CHAR => Value::CharArray(read_array(reader, 4, ByteReader::read_char)?),
        _ => return Err(GraphError::Corruption("unknown value type tag")),
    };
    Ok(value)
}

fn read_array<'a, T>(
    reader: &mut ByteReader<'a>,
    width: usize,
    read: fn(&mut ByteReader<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    let count = reader.read_count(width)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read(reader)?);
    }
    Ok(items)
}

fn node_id_to_i64(id: NodeId) -> Result<i64> {
    i64::try_from(id.0)
        .map_err(|_| GraphError::Serialization(format!("node id {id} exceeds i64")))
}

fn node_id_from_i64(raw: i64) -> Result<NodeId> {
    u64::try_from(raw)
        .map(NodeId)
        .map_err(|_| GraphError::Corruption("negative node id"))
}

/// Encodes node bodies to bytes and back, resolving labels and keys through
/// the persistent string table.
pub struct Codec {
    registry: Arc<LayoutRegistry>,
    strings: Arc<StringTable>,
    metrics: Arc<dyn StorageMetrics>,
}

impl Codec {
    /// Creates a codec over the given schema and string table.
    pub fn new(
        registry: Arc<LayoutRegistry>,
        strings: Arc<StringTable>,
        metrics: Arc<dyn StorageMetrics>,
    ) -> Self {
        Self {
            registry,
            strings,
            metrics,
        }
    }

    /// Serializes `body`.
    ///
    /// The body is marked clean before any byte is written, so a mutation that
    /// races with the write leaves it dirty again. On error the caller must
    /// mark the body dirty. Properties equal to their configured default are
    /// omitted.
    pub fn encode(&self, body: &NodeBody) -> Result<Vec<u8>> {
        let started = Instant::now();
        body.mark_clean();
        let layout = body.layout();
        let mut out = Vec::with_capacity(64 + body.adjacency().len() * 10);
        out.write_i64(node_id_to_i64(body.id())?);
        let label_id = self.strings.lookup_or_create(layout.label())?;
        out.write_i32(str_id_to_i32(label_id)?);

        let stored: Vec<(&Arc<str>, &Value)> = body
            .properties()
            .filter(|(key, value)| layout.default_value(key) != Some(*value))
            .collect();
        out.write_len(stored.len())?;
        for (key, value) in stored {
            let key_id = self.strings.lookup_or_create(key)?;
            out.write_u32(key_id.0);
            write_value(&mut out, value)?;
        }

        let offsets = body.offsets();
        out.write_len(offsets.len())?;
        for offset in offsets.iter() {
            let offset = i32::try_from(offset).map_err(|_| {
                GraphError::Serialization(format!("edge offset {offset} exceeds i32"))
            })?;
            out.write_i32(offset);
        }

        let adjacency = body.adjacency();
        out.write_len(adjacency.len())?;
        for value in adjacency {
            write_value(&mut out, value)?;
        }
        self.metrics.node_serialized(started.elapsed());
        Ok(out)
    }

    /// Deserializes a record written under the current layout of its label.
    pub fn decode(&self, bytes: &[u8]) -> Result<NodeBody> {
        self.decode_with(bytes, None)
    }

    /// Deserializes a record, remapping its edge blocks through `translation`
    /// when it was written under an older layout.
    pub fn decode_with(
        &self,
        bytes: &[u8],
        translation: Option<&LayoutTranslation>,
    ) -> Result<NodeBody> {
        let started = Instant::now();
        let mut reader = ByteReader::new(bytes);
        let (id, layout) = self.read_header(&mut reader)?;

        let prop_count = reader.read_count(5)?;
        let mut props: FxHashMap<Arc<str>, Value> = FxHashMap::default();
        for _ in 0..prop_count {
            let key_id = StrId(reader.read_u32()?);
            let key_name = self
                .strings
                .resolve(key_id)
                .ok_or(GraphError::Corruption("property key id missing from string table"))?;
            let key = layout.property_key(&key_name).ok_or_else(|| {
                GraphError::BackwardCompatibility(format!(
                    "stored property '{key_name}' of label '{}' is not part of the current schema",
                    layout.label()
                ))
            })?;
            let value = read_value(&mut reader, 0)?;
            props.insert(Arc::clone(key), value);
        }
        for (key, default) in layout.defaults() {
            props
                .entry(Arc::clone(key))
                .or_insert_with(|| default.clone());
        }

        let offset_count = reader.read_count(4)?;
        let mut offsets = Vec::with_capacity(offset_count);
        let mut previous = 0u32;
        for _ in 0..offset_count {
            let raw = reader.read_i32()?;
            let offset =
                u32::try_from(raw).map_err(|_| GraphError::Corruption("negative edge offset"))?;
            if offset < previous {
                return Err(GraphError::Corruption("edge offsets not monotonic"));
            }
            previous = offset;
            offsets.push(offset);
        }

        let adj_count = reader.read_count(1)?;
        let mut adjacency = Vec::with_capacity(adj_count);
        for _ in 0..adj_count {
            adjacency.push(read_value(&mut reader, 0)?);
        }
        if previous as usize != adjacency.len() {
            return Err(GraphError::Corruption("edge offsets do not cover adjacency"));
        }
        if reader.remaining() != 0 {
            return Err(GraphError::Corruption("trailing bytes after node record"));
        }

        let identity;
        let translation = match translation {
            Some(t) => t,
            None => {
                identity = LayoutTranslation::identity(&layout);
                &identity
            }
        };
        if offsets.len() != translation.old_slot_count() {
            return Err(GraphError::BackwardCompatibility(format!(
                "record of node {id} has {} edge blocks, label '{}' expects {}",
                offsets.len(),
                layout.label(),
                translation.old_slot_count()
            )));
        }
        let mut start = 0usize;
        for (old_slot, end) in offsets.iter().enumerate() {
            let end = *end as usize;
            if (end - start) % translation.old_stride(old_slot) != 0 {
                return Err(GraphError::Corruption("edge block not a whole number of strides"));
            }
            start = end;
        }
        let (offsets, adjacency) = if translation.is_identity() {
            (PackedOffsetArray::from_values(&offsets), adjacency)
        } else {
            remap_blocks(&layout, translation, &offsets, adjacency)?
        };

        let body = NodeBody::from_parts(id, layout, props, offsets, adjacency);
        body.mark_clean();
        self.metrics.node_deserialized(started.elapsed());
        Ok(body)
    }

    /// Reads only the id and label of a record.
    pub fn decode_handle_only(&self, bytes: &[u8]) -> Result<NodeHandle> {
        let mut reader = ByteReader::new(bytes);
        let (id, layout) = self.read_header(&mut reader)?;
        Ok(NodeHandle::new(id, layout.label_id()))
    }

    fn read_header(&self, reader: &mut ByteReader<'_>) -> Result<(NodeId, Arc<NodeLayout>)> {
        let id = node_id_from_i64(reader.read_i64()?)?;
        let raw_label = reader.read_i32()?;
        let label_id = u32::try_from(raw_label)
            .map(StrId)
            .map_err(|_| GraphError::Corruption("negative label id"))?;
        let label = self
            .strings
            .resolve(label_id)
            .ok_or(GraphError::Corruption("label id missing from string table"))?;
        let layout = self.registry.by_label(&label).ok_or_else(|| {
            GraphError::BackwardCompatibility(format!(
                "stored node label '{label}' is not part of the current schema"
            ))
        })?;
        Ok((id, Arc::clone(layout)))
    }
}

fn str_id_to_i32(id: StrId) -> Result<i32> {
    i32::try_from(id.0).map_err(|_| GraphError::Serialization("string id exceeds i32".into()))
}

fn remap_blocks(
    layout: &NodeLayout,
    translation: &LayoutTranslation,
    offsets: &[u32],
    adjacency: Vec<Value>,
) -> Result<(PackedOffsetArray, Vec<Value>)> {
    let mut blocks: Vec<Vec<Value>> = vec![Vec::new(); layout.slot_count()];
    let mut start = 0usize;
    for (old_slot, end) in offsets.iter().enumerate() {
        let end = *end as usize;
        let old_stride = translation.old_stride(old_slot);
        let new_slot = translation.map_slot(old_slot);
        let new_stride = layout.stride_size(&layout.slots()[new_slot].label);
        let prop_offsets = translation.prop_offsets(old_slot);
        let target = &mut blocks[new_slot];
        for base in (start..end).step_by(old_stride) {
            let mut entry = vec![Value::Null; new_stride];
            entry[0] = adjacency[base].clone();
            for (idx, new_offset) in prop_offsets.iter().enumerate() {
                entry[*new_offset] = adjacency[base + 1 + idx].clone();
            }
            target.extend(entry);
        }
        start = end;
    }
    let mut new_offsets = PackedOffsetArray::new(layout.slot_count());
    let mut flat = Vec::with_capacity(adjacency.len());
    for (slot, block) in blocks.into_iter().enumerate() {
        flat.extend(block);
        let end = u32::try_from(flat.len())
            .map_err(|_| GraphError::Corruption("adjacency length exceeds u32"))?;
        new_offsets.set(slot, end);
    }
    Ok((new_offsets, flat))
}
