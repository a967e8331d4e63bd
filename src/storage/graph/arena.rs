//! Arena of node slots: the single owner of resident node bodies.
//!
//! Lock order is slot, then candidate queue, then store. The store never
//! calls back into a slot.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::storage::metrics::StorageMetrics;
use crate::storage::node::{NodeBody, NodeHandle};
use crate::storage::refs::{CandidateQueue, Evictable, EvictionReport, ResidentBudget};
use crate::storage::ser::Codec;
use crate::storage::store::Store;
use crate::types::NodeId;

/// One node: its handle and, while resident, its body.
pub(crate) struct NodeSlot {
    pub(crate) handle: NodeHandle,
    pub(crate) body: Mutex<Option<NodeBody>>,
    pub(crate) removed: AtomicBool,
    pub(crate) charged: AtomicUsize,
}

impl NodeSlot {
    pub(crate) fn resident(body: NodeBody, charged: usize) -> Self {
        Self {
            handle: body.handle(),
            body: Mutex::new(Some(body)),
            removed: AtomicBool::new(false),
            charged: AtomicUsize::new(charged),
        }
    }

    pub(crate) fn cleared(handle: NodeHandle) -> Self {
        Self {
            handle,
            body: Mutex::new(None),
            removed: AtomicBool::new(false),
            charged: AtomicUsize::new(0),
        }
    }
}

pub(crate) struct Arena {
    slots: RwLock<FxHashMap<NodeId, Arc<NodeSlot>>>,
    pub(crate) store: Arc<Store>,
    pub(crate) codec: Codec,
    queue: Arc<CandidateQueue>,
    budget: Arc<ResidentBudget>,
    metrics: Arc<dyn StorageMetrics>,
}

impl Arena {
    pub(crate) fn new(
        slots: FxHashMap<NodeId, Arc<NodeSlot>>,
        store: Arc<Store>,
        codec: Codec,
        queue: Arc<CandidateQueue>,
        budget: Arc<ResidentBudget>,
        metrics: Arc<dyn StorageMetrics>,
    ) -> Self {
        Self {
            slots: RwLock::new(slots),
            store,
            codec,
            queue,
            budget,
            metrics,
        }
    }

    pub(crate) fn slot(&self, id: NodeId) -> Result<Arc<NodeSlot>> {
        self.slots
            .read()
            .get(&id)
            .cloned()
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.slots.read().contains_key(&id)
    }

    /// Inserts a new slot; fails if the id is taken.
    pub(crate) fn insert(&self, slot: NodeSlot) -> Result<Arc<NodeSlot>> {
        let id = slot.handle.id();
        let slot = Arc::new(slot);
        let mut slots = self.slots.write();
        if slots.contains_key(&id) {
            return Err(GraphError::Invalid("node id already in use"));
        }
        slots.insert(id, Arc::clone(&slot));
        Ok(slot)
    }

    pub(crate) fn unlink(&self, id: NodeId) {
        self.slots.write().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub(crate) fn handles(&self) -> Vec<NodeHandle> {
        let mut handles: Vec<NodeHandle> =
            self.slots.read().values().map(|slot| slot.handle).collect();
        handles.sort_by_key(|handle| handle.id());
        handles
    }

    pub(crate) fn all_slots(&self) -> Vec<Arc<NodeSlot>> {
        self.slots.read().values().cloned().collect()
    }

    /// Decodes a cleared node's body from the store.
    pub(crate) fn load(&self, id: NodeId) -> Result<NodeBody> {
        let bytes = self
            .store
            .read(id)?
            .ok_or(GraphError::Corruption("cleared node missing from store"))?;
        let body = self.codec.decode(&bytes)?;
        if body.id() != id {
            return Err(GraphError::Corruption("stored record id mismatch"));
        }
        Ok(body)
    }

    pub(crate) fn release(&self, slot: &NodeSlot) {
        self.budget.release(slot.charged.swap(0, Ordering::AcqRel));
    }

    /// Moves the slot's budget charge to `bytes`. Call with the slot locked.
    pub(crate) fn recharge(&self, slot: &NodeSlot, bytes: usize) {
        let previous = slot.charged.swap(bytes, Ordering::AcqRel);
        if bytes > previous {
            self.budget.charge(bytes - previous);
        } else {
            self.budget.release(previous - bytes);
        }
    }

    pub(crate) fn resident_bytes(&self) -> usize {
        self.budget.used()
    }
}

struct Written {
    slot: Arc<NodeSlot>,
    bytes: Vec<u8>,
}

impl Evictable for Arena {
    fn evict(&self, batch: &[NodeId]) -> EvictionReport {
        let mut report = EvictionReport::default();
        let mut written: Vec<Written> = Vec::with_capacity(batch.len());

        for id in batch {
            let Ok(slot) = self.slot(*id) else {
                report.skipped += 1;
                continue;
            };
            let mut guard = slot.body.lock();
            if slot.removed.load(Ordering::Acquire) {
                report.skipped += 1;
                continue;
            }
            let Some(body) = guard.as_ref() else {
                report.skipped += 1;
                continue;
            };
            if !body.is_dirty() {
                *guard = None;
                drop(guard);
                self.release(&slot);
                report.cleared += 1;
                continue;
            }
            match self.codec.encode(body) {
                Ok(bytes) => {
                    drop(guard);
                    written.push(Written { slot, bytes });
                }
                Err(err) => {
                    body.mark_dirty();
                    warn!(node = id.0, error = %err, "refs.evict.encode_failed");
                    self.metrics.eviction_failed();
                    report.failed += 1;
                }
            }
        }

        if !written.is_empty() {
            let records: Vec<(NodeId, Vec<u8>)> = written
                .iter_mut()
                .map(|w| (w.slot.handle.id(), std::mem::take(&mut w.bytes)))
                .collect();
            match self.store.persist_batch(&records) {
                Ok(outcome) => {
                    let failed: FxHashMap<NodeId, GraphError> =
                        outcome.failed.into_iter().collect();
                    for w in &written {
                        let id = w.slot.handle.id();
                        if let Some(err) = failed.get(&id) {
                            self.keep_resident(&w.slot, err);
                            report.failed += 1;
                        } else {
                            self.finish_cleared(&w.slot, &mut report);
                        }
                    }
                }
                Err(err) => {
                    for w in &written {
                        self.keep_resident(&w.slot, &err);
                        report.failed += 1;
                    }
                }
            }
        }

        if report.cleared > 0 {
            self.metrics.nodes_evicted(report.cleared);
        }
        debug!(
            cleared = report.cleared,
            failed = report.failed,
            requeued = report.requeued,
            skipped = report.skipped,
            resident_bytes = self.budget.used(),
            "refs.evict.chunk_done"
        );
        report
    }
}

impl Arena {
    fn keep_resident(&self, slot: &NodeSlot, err: &GraphError) {
        if let Some(body) = slot.body.lock().as_ref() {
            body.mark_dirty();
        }
        warn!(node = slot.handle.id().0, error = %err, "refs.evict.persist_failed");
        self.metrics.eviction_failed();
    }

    fn finish_cleared(&self, slot: &NodeSlot, report: &mut EvictionReport) {
        let id = slot.handle.id();
        let mut guard = slot.body.lock();
        if slot.removed.load(Ordering::Acquire) {
            drop(guard);
            if let Err(err) = self.store.remove(id) {
                warn!(node = id.0, error = %err, "refs.evict.remove_after_write_failed");
            }
            report.skipped += 1;
            return;
        }
        match guard.as_ref() {
            Some(body) if body.is_dirty() => {
                self.queue.push(id);
                report.requeued += 1;
            }
            Some(_) => {
                *guard = None;
                drop(guard);
                self.release(slot);
                report.cleared += 1;
            }
            None => report.skipped += 1,
        }
    }
}
