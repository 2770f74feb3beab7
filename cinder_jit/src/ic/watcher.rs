//! Type watcher graph.
//!
//! A bidirectional map between types and the cache entries that depend on
//! them:
//!
//! - **Forward**: `TypeId → {WatchId}`, walked when a type changes
//! - **Reverse**: `WatchId → [(TypeId, version)]`, used to unlink an entry
//!   from every type it watched
//!
//! Each registration shares an `AtomicBool` with the [`WatchHandle`] held by
//! the cache entry. Firing a type flips the flag of every dependent and
//! unlinks it, so a probe sees either a valid entry under the old version or
//! an invalid one. Dropping a handle deregisters it eagerly.

use crate::error::{IcError, IcResult};
use cinder_runtime::{
    BulkReason, MutationKind, RuntimeObserver, TypeId, TypeRef, VersionTag,
};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// Watch Handle
// =============================================================================

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// Owned by a cache entry; deregisters on drop.
pub struct WatchHandle {
    id: WatchId,
    valid: Arc<AtomicBool>,
    graph: Weak<WatcherGraph>,
}

impl WatchHandle {
    /// Registration id.
    #[inline]
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// False once any watched type fired.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(graph) = self.graph.upgrade() {
            graph.unwatch(self.id);
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of graph counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Live registrations.
    pub registrations: usize,
    /// Types with at least one dependent.
    pub watched_types: usize,
    /// `fire` calls, destruction included.
    pub fires: u64,
    /// Registrations invalidated by fires.
    pub invalidated: u64,
    /// Whole-graph sweeps.
    pub bulk_sweeps: u64,
    /// Watch requests refused.
    pub refused: u64,
}

// =============================================================================
// Watcher Graph
// =============================================================================

struct Registration {
    deps: SmallVec<[(TypeId, VersionTag); 8]>,
    valid: Arc<AtomicBool>,
}

#[derive(Default)]
struct GraphState {
    forward: FxHashMap<TypeId, FxHashSet<WatchId>>,
    reverse: FxHashMap<WatchId, Registration>,
}

impl GraphState {
    /// Remove `id` from both maps, returning its registration.
    fn unlink(&mut self, id: WatchId) -> Option<Registration> {
        let reg = self.reverse.remove(&id)?;
        for (ty, _) in &reg.deps {
            if let Some(set) = self.forward.get_mut(ty) {
                set.remove(&id);
                if set.is_empty() {
                    self.forward.remove(ty);
                }
            }
        }
        Some(reg)
    }
}

/// Dependency graph from types to cache entries.
pub struct WatcherGraph {
    state: Mutex<GraphState>,
    next_id: AtomicU64,
    self_ref: Weak<WatcherGraph>,
    fires: AtomicU64,
    invalidated: AtomicU64,
    bulk_sweeps: AtomicU64,
    refused: AtomicU64,
}

impl WatcherGraph {
    /// Create an empty graph.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(GraphState::default()),
            next_id: AtomicU64::new(1),
            self_ref: self_ref.clone(),
            fires: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            bulk_sweeps: AtomicU64::new(0),
            refused: AtomicU64::new(0),
        })
    }

    /// `watch(cache, types)`: register a dependency on every type in
    /// `types` at its current version.
    ///
    /// Fails without registering anything if a type refuses watching.
    /// Every type in `types` is held alive by the caller, so none can be
    /// destroyed while it is registered.
    pub fn watch(&self, types: &[TypeRef]) -> IcResult<WatchHandle> {
        let mut deps: SmallVec<[(TypeId, VersionTag); 8]> = SmallVec::new();
        for ty in types {
            if !ty.is_watchable() {
                self.refused.fetch_add(1, Ordering::Relaxed);
                return Err(IcError::WatcherUnavailable {
                    type_name: ty.name().to_string(),
                });
            }
            if !deps.iter().any(|(id, _)| *id == ty.id()) {
                deps.push((ty.id(), ty.version()));
            }
        }

        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let valid = Arc::new(AtomicBool::new(true));
        {
            let mut state = self.state.lock();
            for (ty, _) in &deps {
                state.forward.entry(*ty).or_default().insert(id);
            }
            state.reverse.insert(
                id,
                Registration {
                    deps: deps.clone(),
                    valid: Arc::clone(&valid),
                },
            );
        }

        // A version that moved before the registration landed was never
        // seen by this entry's fire.
        let stale = types
            .iter()
            .any(|t| deps.iter().any(|(id, v)| *id == t.id() && *v != t.version()));
        if stale {
            valid.store(false, Ordering::Release);
            self.state.lock().unlink(id);
        }

        tracing::trace!(watch = id.0, types = deps.len(), "watch registered");
        Ok(WatchHandle {
            id,
            valid,
            graph: self.self_ref.clone(),
        })
    }

    /// `fire(t)`: invalidate and unlink every dependent of `ty`. Returns the
    /// number of entries invalidated.
    pub fn fire(&self, ty: TypeId) -> usize {
        self.fires.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let Some(ids) = state.forward.remove(&ty) else {
            return 0;
        };
        let mut count = 0;
        for id in ids {
            if let Some(reg) = state.unlink(id) {
                reg.valid.store(false, Ordering::Release);
                count += 1;
            }
        }
        drop(state);

        self.invalidated.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            tracing::trace!(type_id = ty.raw(), count, "watchers fired");
        }
        count
    }

    /// `destroyed(t)`: fire and forget the type. Its dependents stay
    /// invalid; ids are never reused so nothing can re-register against it.
    pub fn destroyed(&self, ty: TypeId) -> usize {
        let count = self.fire(ty);
        if count > 0 {
            tracing::debug!(type_id = ty.raw(), count, "dependents of destroyed type invalidated");
        }
        count
    }

    /// Invalidate every registration.
    pub fn bulk_invalidate(&self) -> usize {
        self.bulk_sweeps.fetch_add(1, Ordering::Relaxed);
        let state = std::mem::take(&mut *self.state.lock());
        let count = state.reverse.len();
        for reg in state.reverse.into_values() {
            reg.valid.store(false, Ordering::Release);
        }
        self.invalidated.fetch_add(count as u64, Ordering::Relaxed);
        tracing::debug!(count, "watcher graph swept");
        count
    }

    /// Number of registrations depending on `ty`.
    pub fn dependents(&self, ty: TypeId) -> usize {
        self.state.lock().forward.get(&ty).map_or(0, FxHashSet::len)
    }

    /// Recorded `(type, version)` pairs of a live registration.
    pub fn recorded(&self, id: WatchId) -> Option<Vec<(TypeId, VersionTag)>> {
        self.state
            .lock()
            .reverse
            .get(&id)
            .map(|reg| reg.deps.to_vec())
    }

    fn unwatch(&self, id: WatchId) {
        self.state.lock().unlink(id);
    }

    /// Counter snapshot.
    pub fn stats(&self) -> WatcherStats {
        let state = self.state.lock();
        WatcherStats {
            registrations: state.reverse.len(),
            watched_types: state.forward.len(),
            fires: self.fires.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            bulk_sweeps: self.bulk_sweeps.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }
}

/// A bare graph can observe a runtime directly; the JIT wraps it in a
/// listener that also drives deoptimization.
impl RuntimeObserver for WatcherGraph {
    fn mutation_observed(&self, ty: TypeId, _kind: &MutationKind) {
        self.fire(ty);
    }

    fn type_destroyed(&self, ty: TypeId) {
        self.destroyed(ty);
    }

    fn bulk_invalidate(&self, _reason: BulkReason) {
        WatcherGraph::bulk_invalidate(self);
    }
}

impl fmt::Debug for WatcherGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherGraph")
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
