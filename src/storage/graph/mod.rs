//! Graph lifecycle and the mutation API.
//!
//! A [`Graph`] owns the layout registry, the store, the arena of node slots
//! and the reference manager. Node bodies are reached through handles; a
//! cleared body is decoded from the store on first access and registered
//! for eviction again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};
use crate::types::NodeId;

use super::index::IndexManager;
use super::layout::{LayoutRegistry, LayoutTranslation};
use super::metrics::{default_metrics, StorageMetrics};
use super::node::{NodeBody, NodeHandle};
use super::options::GraphOptions;
use super::refs::{
    CandidateQueue, EvictionConfig, EvictionReport, Evictable, ReferenceManager, ResidentBudget,
};
use super::schema::Schema;
use super::ser::Codec;
use super::store::Store;

mod arena;
mod edge_ops;
mod node_ops;
mod prop_ops;
#[cfg(test)]
mod tests;

use arena::{Arena, NodeSlot};

const MIGRATION_CHUNK: usize = 1024;

/// An embedded property graph whose cold nodes overflow to disk.
pub struct Graph {
    registry: Arc<LayoutRegistry>,
    store: Arc<Store>,
    arena: Arc<Arena>,
    refs: ReferenceManager,
    index: IndexManager,
    metrics: Arc<dyn StorageMetrics>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Graph {
    /// Opens a graph over `schema`.
    ///
    /// Fails without opening when the stored format version differs, when a
    /// stored label, edge or property has no counterpart in `schema`, or when
    /// the options are invalid. Records written under a narrower layout are
    /// rewritten under the current one before the graph becomes usable.
    pub fn open(schema: &Schema, options: GraphOptions) -> Result<Self> {
        options.validate()?;
        let registry = Arc::new(LayoutRegistry::from_schema(schema)?);
        let in_memory = options.storage_path.is_none() && !options.overflow_enabled;
        let store = Arc::new(Store::open(options.storage_path.as_deref(), in_memory)?);
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let codec = Codec::new(
            Arc::clone(&registry),
            Arc::clone(store.strings()),
            Arc::clone(&metrics),
        );

        migrate_layouts(&store, &registry, &codec)?;

        let mut slots = FxHashMap::default();
        let mut next_id = 0u64;
        for row in store.scan_all() {
            let (id, bytes) = row?;
            let handle = codec.decode_handle_only(&bytes)?;
            if handle.id() != id {
                return Err(GraphError::Corruption("stored record id mismatch"));
            }
            next_id = next_id.max(id.0 + 1);
            slots.insert(id, Arc::new(NodeSlot::cleared(handle)));
        }
        let rehydrated = slots.len();

        let queue = Arc::new(CandidateQueue::new());
        let budget = Arc::new(ResidentBudget::new(
            options.memory_budget_bytes,
            options.heap_threshold,
        ));
        let arena = Arc::new(Arena::new(
            slots,
            Arc::clone(&store),
            codec,
            Arc::clone(&queue),
            Arc::clone(&budget),
            Arc::clone(&metrics),
        ));
        let refs = ReferenceManager::start(
            EvictionConfig {
                enabled: options.overflow_enabled,
                batch_size: options.eviction_batch_size,
                worker_threads: options.worker_threads,
                monitor_interval: options.monitor_interval,
            },
            queue,
            budget,
            Arc::clone(&arena) as Arc<dyn Evictable>,
        )?;
        let index = IndexManager::load(Arc::clone(&store))?;
        info!(
            labels = registry.len(),
            nodes = rehydrated,
            next_id,
            overflow = options.overflow_enabled,
            indexes = index.keys().len(),
            "graph.open"
        );
        Ok(Self {
            registry,
            store,
            arena,
            refs,
            index,
            metrics,
            next_id: AtomicU64::new(next_id),
            closed: AtomicBool::new(false),
        })
    }

    /// Drains every resident body to the store, writes what could not be
    /// evicted, flushes metadata and releases threads and files. Ephemeral
    /// stores are deleted. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.refs.drain_all();
        self.refs.shutdown();
        let persisted = if self.store.is_ephemeral() {
            Ok(0)
        } else {
            self.persist_resident()
        };
        let closed = self.store.close();
        info!(report = ?self.refs.report(), "graph.close");
        let persisted = persisted?;
        debug!(persisted, "graph.close.persisted_resident");
        closed
    }

    /// Writes every dirty resident body.
    fn persist_resident(&self) -> Result<usize> {
        let mut pending: Vec<(NodeId, Vec<u8>)> = Vec::new();
        let mut written = 0usize;
        let mut first_err: Option<GraphError> = None;
        for slot in self.arena.all_slots() {
            let guard = slot.body.lock();
            let Some(body) = guard.as_ref() else {
                continue;
            };
            if slot.removed.load(Ordering::Acquire) || !body.is_dirty() {
                continue;
            }
            match self.arena.codec.encode(body) {
                Ok(bytes) => pending.push((slot.handle.id(), bytes)),
                Err(err) => {
                    body.mark_dirty();
                    first_err.get_or_insert(err);
                }
            }
            drop(guard);
            if pending.len() >= MIGRATION_CHUNK {
                written += self.write_all(&mut pending, &mut first_err);
            }
        }
        written += self.write_all(&mut pending, &mut first_err);
        match first_err {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    fn write_all(
        &self,
        pending: &mut Vec<(NodeId, Vec<u8>)>,
        first_err: &mut Option<GraphError>,
    ) -> usize {
        if pending.is_empty() {
            return 0;
        }
        let records = std::mem::take(pending);
        match self.store.persist_batch(&records) {
            Ok(outcome) => {
                for (id, err) in outcome.failed {
                    warn!(node = id.0, error = %err, "graph.close.persist_failed");
                    first_err.get_or_insert(err);
                }
                outcome.persisted.len()
            }
            Err(err) => {
                first_err.get_or_insert(err);
                0
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GraphError::Closed);
        }
        Ok(())
    }

    /// Layout registry built from the schema.
    pub fn registry(&self) -> &Arc<LayoutRegistry> {
        &self.registry
    }

    /// Runs `f` on the node's body, decoding it from the store first if it was
    /// evicted. A decoded body is registered for eviction again.
    pub(crate) fn with_body<R>(
        &self,
        handle: NodeHandle,
        f: impl FnOnce(&mut NodeBody) -> Result<R>,
    ) -> Result<R> {
        self.ensure_open()?;
        let id = handle.id();
        let slot = self.arena.slot(id)?;
        let mut loaded = None;
        let result = {
            let mut guard = slot.body.lock();
            if slot.removed.load(Ordering::Acquire) {
                return Err(GraphError::NodeNotFound(id));
            }
            if guard.is_none() {
                let body = self.arena.load(id)?;
                let bytes = body.approx_bytes();
                slot.charged.store(bytes, Ordering::Release);
                *guard = Some(body);
                loaded = Some(bytes);
            }
            match guard.as_mut() {
                Some(body) => f(body),
                None => Err(GraphError::NodeNotFound(id)),
            }
        };
        if let Some(bytes) = loaded {
            self.refs.register(id, bytes);
            self.metrics.node_rehydrated();
            debug!(node = id.0, bytes, "graph.rehydrate");
        }
        result
    }

    /// Runs `f` on the node's body without making an evicted node resident.
    pub(crate) fn read_body<R>(
        &self,
        handle: NodeHandle,
        f: impl FnOnce(&NodeBody) -> Result<R>,
    ) -> Result<R> {
        self.ensure_open()?;
        let id = handle.id();
        let slot = self.arena.slot(id)?;
        let guard = slot.body.lock();
        if slot.removed.load(Ordering::Acquire) {
            return Err(GraphError::NodeNotFound(id));
        }
        match guard.as_ref() {
            Some(body) => f(body),
            None => {
                drop(guard);
                let body = self.arena.load(id)?;
                f(&body)
            }
        }
    }

    /// Returns true if the node's body is in memory.
    pub fn is_resident(&self, handle: NodeHandle) -> bool {
        self.arena
            .slot(handle.id())
            .map(|slot| slot.body.lock().is_some())
            .unwrap_or(false)
    }

    /// Evicts every queued resident body and waits for the writes.
    pub fn drain(&self) -> Result<()> {
        self.ensure_open()?;
        self.refs.drain_all();
        Ok(())
    }

    /// Approximate bytes held by resident bodies.
    pub fn resident_bytes(&self) -> usize {
        self.arena.resident_bytes()
    }

    /// Cumulative eviction outcome since open.
    pub fn eviction_report(&self) -> EvictionReport {
        self.refs.report()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "graph.drop.close_failed");
        }
    }
}

/// Rewrites records of every label whose stored layout differs from the
/// current one, then records the current layouts.
fn migrate_layouts(store: &Store, registry: &LayoutRegistry, codec: &Codec) -> Result<()> {
    let mut translations = FxHashMap::default();
    for (label, stored) in store.stored_layouts()? {
        let current = registry.by_label(&label).ok_or_else(|| {
            GraphError::BackwardCompatibility(format!(
                "stored node label '{label}' is not part of the current schema"
            ))
        })?;
        let translation = LayoutTranslation::new(&stored, current)?;
        if !translation.is_identity() {
            translations.insert(current.label_id(), translation);
        }
    }

    if !translations.is_empty() {
        let mut rewritten = 0usize;
        let mut pending: Vec<(NodeId, Vec<u8>)> = Vec::new();
        for row in store.scan_all() {
            let (id, bytes) = row?;
            let handle = codec.decode_handle_only(&bytes)?;
            let Some(translation) = translations.get(&handle.label()) else {
                continue;
            };
            let body = codec.decode_with(&bytes, Some(translation))?;
            pending.push((id, codec.encode(&body)?));
            if pending.len() >= MIGRATION_CHUNK {
                rewritten += persist_all(store, &mut pending)?;
            }
        }
        rewritten += persist_all(store, &mut pending)?;
        info!(
            labels = translations.len(),
            records = rewritten,
            "graph.open.migrated"
        );
    }

    for layout in registry.iter() {
        store.put_layout(layout.label(), &layout.to_stored())?;
    }
    Ok(())
}

fn persist_all(store: &Store, pending: &mut Vec<(NodeId, Vec<u8>)>) -> Result<usize> {
    if pending.is_empty() {
        return Ok(0);
    }
    let records = std::mem::take(pending);
    let mut outcome = store.persist_batch(&records)?;
    if let Some((_, err)) = outcome.failed.pop() {
        return Err(err);
    }
    Ok(outcome.persisted.len())
}
