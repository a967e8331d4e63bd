#![forbid(unsafe_code)]
//! Process-wide string interning for decoded string values.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

static INTERNER: OnceLock<RwLock<FxHashSet<Arc<str>>>> = OnceLock::new();

fn interner() -> &'static RwLock<FxHashSet<Arc<str>>> {
    INTERNER.get_or_init(|| RwLock::new(FxHashSet::default()))
}

/// Returns the shared instance for `value`, inserting it on first sight.
///
/// Equal strings decoded anywhere in the process share one allocation, so
/// [`Arc::ptr_eq`] can be used as a fast equality check.
pub fn intern(value: &str) -> Arc<str> {
    if let Some(existing) = interner().read().get(value) {
        return Arc::clone(existing);
    }
    let mut guard = interner().write();
    if let Some(existing) = guard.get(value) {
        return Arc::clone(existing);
    }
    let shared: Arc<str> = Arc::from(value);
    guard.insert(Arc::clone(&shared));
    shared
}

/// Number of distinct strings currently interned.
pub fn interned_count() -> usize {
    interner().read().len()
}
