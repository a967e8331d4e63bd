use std::collections::BTreeSet;

use crate::error::Result;
use crate::storage::node::NodeHandle;
use crate::storage::types::Value;
use crate::types::NodeId;

use super::Graph;

impl Graph {
    /// Current value of a node property, the label default when unset.
    pub fn property(&self, handle: NodeHandle, key: &str) -> Result<Option<Value>> {
        self.with_body(handle, |body| Ok(body.property(key)?.cloned()))
    }

    /// All current properties of a node, sorted by key.
    pub fn properties(&self, handle: NodeHandle) -> Result<Vec<(String, Value)>> {
        self.with_body(handle, |body| {
            let mut props: Vec<(String, Value)> = body
                .properties()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect();
            props.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(props)
        })
    }

    /// Sets a node property, returning the previous value.
    pub fn set_property(
        &self,
        handle: NodeHandle,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>> {
        let id = handle.id();
        self.with_body(handle, |body| {
            let previous = body.set_property(key, value)?;
            self.index
                .on_change(id, key, previous.as_ref(), body.property(key)?)?;
            Ok(previous)
        })
    }

    /// Unsets a node property, returning the previous value.
    pub fn remove_property(&self, handle: NodeHandle, key: &str) -> Result<Option<Value>> {
        let id = handle.id();
        self.with_body(handle, |body| {
            let previous = body.remove_property(key)?;
            self.index
                .on_change(id, key, previous.as_ref(), body.property(key)?)?;
            Ok(previous)
        })
    }

    /// Indexes `key` over every node, resident or evicted. Returns the number
    /// of entries written.
    pub fn create_index(&self, key: &str) -> Result<usize> {
        self.ensure_open()?;
        let mut entries = Vec::new();
        for handle in self.nodes() {
            let value = self.read_body(handle, |body| {
                if body.layout().property_key(key).is_none() {
                    return Ok(None);
                }
                Ok(body.property(key)?.cloned())
            })?;
            if let Some(value) = value {
                entries.push(Ok((handle.id(), value)));
            }
        }
        self.index.create(key, entries)
    }

    /// Drops the index on `key`. Returns false if there was none.
    pub fn drop_index(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        self.index.drop_index(key)
    }

    /// Keys with an index, sorted.
    pub fn indexed_keys(&self) -> Vec<String> {
        self.index.keys()
    }

    /// Ids of nodes whose current value of `key` equals `value`.
    ///
    /// Fails with [`crate::GraphError::IndexMissing`] when `key` has no index.
    pub fn lookup(&self, key: &str, value: &Value) -> Result<BTreeSet<NodeId>> {
        self.ensure_open()?;
        self.index.lookup(key, value)
    }
}
