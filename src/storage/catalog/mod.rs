#![forbid(unsafe_code)]
//! String table mapping labels and property keys to compact integer ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{GraphError, Result};
use crate::types::StrId;

#[derive(Default)]
struct Inner {
    by_str: FxHashMap<Arc<str>, StrId>,
    by_id: FxHashMap<StrId, Arc<str>>,
    next_id: u32,
    pending: Vec<StrId>,
}

/// Counters describing string table usage.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringTableStats {
    /// Calls to [`StringTable::lookup_or_create`].
    pub lookups: u64,
    /// Lookups that had to assign a new id.
    pub inserts: u64,
}

/// Bidirectional string ↔ id map.
///
/// Lookups and inserts are atomic with respect to each other. Newly assigned
/// ids are queued until the store writes them together with the next batch of
/// node records, so a record never references an id the store does not know.
#[derive(Default)]
pub struct StringTable {
    inner: RwLock<Inner>,
    lookups: AtomicU64,
    inserts: AtomicU64,
}

impl StringTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the table from persisted entries and the stored id high-water mark.
    pub fn load(
        entries: impl IntoIterator<Item = (StrId, String)>,
        stored_max_id: u32,
    ) -> Result<Self> {
        let mut inner = Inner {
            next_id: stored_max_id,
            ..Inner::default()
        };
        for (id, value) in entries {
            let value: Arc<str> = Arc::from(value);
            if inner.by_str.insert(Arc::clone(&value), id).is_some() {
                return Err(GraphError::Corruption("duplicate string table entry"));
            }
            inner.by_id.insert(id, value);
            inner.next_id = inner.next_id.max(id.0 + 1);
        }
        Ok(Self {
            inner: RwLock::new(inner),
            ..Self::default()
        })
    }

    /// Returns the id of `value`, assigning the next id on first use.
    pub fn lookup_or_create(&self, value: &str) -> Result<StrId> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if let Some(id) = self.inner.read().by_str.get(value) {
            return Ok(*id);
        }
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_str.get(value) {
            return Ok(*id);
        }
        let id = StrId(inner.next_id);
        inner.next_id = inner
            .next_id
            .checked_add(1)
            .ok_or_else(|| GraphError::Serialization("string table id space exhausted".into()))?;
        let shared: Arc<str> = Arc::from(value);
        inner.by_str.insert(Arc::clone(&shared), id);
        inner.by_id.insert(id, shared);
        inner.pending.push(id);
        self.inserts.fetch_add(1, Ordering::Relaxed);
        trace!(id = id.0, value, "catalog.strings.insert");
        Ok(id)
    }

    /// Resolves an id to its string.
    pub fn resolve(&self, id: StrId) -> Option<Arc<str>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// Looks up an id without assigning one.
    pub fn lookup(&self, value: &str) -> Option<StrId> {
        self.inner.read().by_str.get(value).copied()
    }

    /// Next id to be assigned; persisted as the high-water mark.
    pub fn max_id(&self) -> u32 {
        self.inner.read().next_id
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Returns true if no strings are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains entries that have not been written to the store yet.
    pub fn take_pending(&self) -> Vec<(StrId, Arc<str>)> {
        let mut inner = self.inner.write();
        let pending = std::mem::take(&mut inner.pending);
        pending
            .into_iter()
            .filter_map(|id| inner.by_id.get(&id).map(|s| (id, Arc::clone(s))))
            .collect()
    }

    /// Requeues entries whose write failed.
    pub fn restore_pending(&self, entries: &[(StrId, Arc<str>)]) {
        let mut inner = self.inner.write();
        inner.pending.extend(entries.iter().map(|(id, _)| *id));
    }

    /// Usage counters.
    pub fn stats(&self) -> StringTableStats {
        StringTableStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}
