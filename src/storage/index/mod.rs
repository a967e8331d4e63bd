#![forbid(unsafe_code)]
//! Property-value indices kept in the store's index tables.
//!
//! An index on key `k` maps each encoded value to the set of nodes whose
//! current value of `k` equals it. Defaults count as current values.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::types::NodeId;

use super::ser::encode_value;
use super::store::Store;
use super::types::Value;

/// Registry of indexed property keys with incremental maintenance hooks.
pub struct IndexManager {
    store: Arc<Store>,
    keys: RwLock<FxHashSet<Arc<str>>>,
}

impl IndexManager {
    /// Loads the indexed keys recorded in the store.
    pub fn load(store: Arc<Store>) -> Result<Self> {
        let keys = store
            .index_keys()?
            .into_iter()
            .map(|key| Arc::from(key.as_str()))
            .collect();
        Ok(Self {
            store,
            keys: RwLock::new(keys),
        })
    }

    /// Returns true if `key` is indexed.
    pub fn is_indexed(&self, key: &str) -> bool {
        self.keys.read().contains(key)
    }

    /// Returns true if no key is indexed.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Indexed keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.read().iter().map(|k| k.to_string()).collect();
        keys.sort();
        keys
    }

    /// Builds (or rebuilds) the index on `key` from `entries`, the current
    /// value of `key` for every node that has one.
    pub fn create<I>(&self, key: &str, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<(NodeId, Value)>>,
    {
        let mut rows = Vec::new();
        for entry in entries {
            let (id, value) = entry?;
            rows.push((encode_value(&value)?, id));
        }
        self.store.index_rebuild(key, &rows)?;
        self.keys.write().insert(Arc::from(key));
        info!(key, entries = rows.len(), "index.create");
        Ok(rows.len())
    }

    /// Removes the index on `key`. Returns false if there was none.
    pub fn drop_index(&self, key: &str) -> Result<bool> {
        if !self.keys.write().remove(key) {
            return Ok(false);
        }
        self.store.index_drop(key)?;
        info!(key, "index.drop");
        Ok(true)
    }

    /// Updates the index on `key`, if any, after a node's value changed
    /// from `old` to `new`.
    pub fn on_change(
        &self,
        id: NodeId,
        key: &str,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> Result<()> {
        if !self.is_indexed(key) || old == new {
            return Ok(());
        }
        if let Some(old) = old {
            self.store.index_remove(key, &encode_value(old)?, id)?;
        }
        if let Some(new) = new {
            self.store.index_insert(key, &encode_value(new)?, id)?;
        }
        debug!(key, node = id.0, "index.update");
        Ok(())
    }

    /// Adds a new node's values to every matching index.
    pub fn on_insert<'a, I>(&self, id: NodeId, props: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a Arc<str>, &'a Value)>,
    {
        if self.is_empty() {
            return Ok(());
        }
        for (key, value) in props {
            if self.is_indexed(key) {
                self.store.index_insert(key, &encode_value(value)?, id)?;
            }
        }
        Ok(())
    }

    /// Removes a node from every index.
    pub fn on_remove_node(&self, id: NodeId) -> Result<()> {
        let keys: Vec<Arc<str>> = self.keys.read().iter().cloned().collect();
        for key in keys {
            self.store.index_remove_node(&key, id)?;
        }
        Ok(())
    }

    /// Nodes whose current value of `key` equals `value`.
    pub fn lookup(&self, key: &str, value: &Value) -> Result<BTreeSet<NodeId>> {
        if !self.is_indexed(key) {
            return Err(GraphError::IndexMissing(key.to_string()));
        }
        self.store.index_lookup(key, &encode_value(value)?)
    }
}
