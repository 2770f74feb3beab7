//! JIT runtime observer.
//!
//! Implements `RuntimeObserver` for the JIT. Every runtime event that can
//! falsify a cache entry is routed here:
//!
//! 1. **Mutations**: fire the type's watchers before the version bump
//! 2. **Destruction**: fire dependents, or sweep everything when the type has
//!    more dependents than `bulk_invalidation_threshold`
//! 3. **Instrumentation**: hand off to the deopt coordinator
//! 4. **Bulk invalidation**: sweep the graph and mark every site cold
//!
//! # Thread Safety
//!
//! The listener is fully thread-safe:
//! - `WatcherGraph` uses internal locking and never calls back out
//! - Statistics use atomic counters

use super::watcher::WatcherGraph;
use crate::runtime::DeoptCoordinator;
use cinder_runtime::{BulkReason, MutationKind, RuntimeObserver, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// JIT Type Listener
// =============================================================================

/// The JIT's runtime observer.
#[derive(Debug)]
pub struct JitTypeListener {
    graph: Arc<WatcherGraph>,
    coordinator: Arc<DeoptCoordinator>,
    bulk_threshold: usize,
    stats: JitListenerStats,
}

impl JitTypeListener {
    /// Create a listener routing into `graph` and `coordinator`.
    pub fn new(
        graph: Arc<WatcherGraph>,
        coordinator: Arc<DeoptCoordinator>,
        bulk_threshold: usize,
    ) -> Self {
        Self {
            graph,
            coordinator,
            bulk_threshold,
            stats: JitListenerStats::new(),
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> &JitListenerStats {
        &self.stats
    }

    fn sweep(&self, reason: BulkReason) {
        let invalidated = self.graph.bulk_invalidate();
        self.coordinator.mark_all_cold(reason);
        self.stats.record_bulk(invalidated as u64);
    }
}

impl RuntimeObserver for JitTypeListener {
    fn mutation_observed(&self, ty: TypeId, kind: &MutationKind) {
        self.stats.record_mutation();
        let count = self.graph.fire(ty);
        self.stats.record_invalidated(count as u64);
        if count > 0 {
            tracing::trace!(type_id = ty.raw(), ?kind, count, "type mutation fired watchers");
        }
    }

    fn type_destroyed(&self, ty: TypeId) {
        self.stats.record_destruction();
        let dependents = self.graph.dependents(ty);
        if dependents > self.bulk_threshold {
            tracing::debug!(
                type_id = ty.raw(),
                dependents,
                "destroyed type has too many dependents, sweeping"
            );
            self.sweep(BulkReason::DependentsOverflow);
        } else {
            let count = self.graph.destroyed(ty);
            self.stats.record_invalidated(count as u64);
        }
    }

    fn instrumentation_state_changed(&self, active: bool) {
        self.stats.record_instrumentation();
        self.coordinator.instrumentation_changed(active);
    }

    fn bulk_invalidate(&self, reason: BulkReason) {
        tracing::debug!(?reason, "bulk invalidation");
        self.sweep(reason);
    }
}

// =============================================================================
// JIT Listener Statistics
// =============================================================================

/// Statistics for the JIT listener.
#[derive(Debug, Default)]
pub struct JitListenerStats {
    /// Total mutation events received
    mutations: AtomicU64,
    /// Total type destructions received
    destructions: AtomicU64,
    /// Total instrumentation changes received
    instrumentation_changes: AtomicU64,
    /// Total bulk sweeps performed
    bulk_sweeps: AtomicU64,
    /// Total cache entries invalidated
    entries_invalidated: AtomicU64,
}

impl JitListenerStats {
    /// Create new zeroed stats.
    pub const fn new() -> Self {
        Self {
            mutations: AtomicU64::new(0),
            destructions: AtomicU64::new(0),
            instrumentation_changes: AtomicU64::new(0),
            bulk_sweeps: AtomicU64::new(0),
            entries_invalidated: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_destruction(&self) {
        self.destructions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_instrumentation(&self) {
        self.instrumentation_changes
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_bulk(&self, count: u64) {
        self.bulk_sweeps.fetch_add(1, Ordering::Relaxed);
        self.entries_invalidated
            .fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    fn record_invalidated(&self, count: u64) {
        self.entries_invalidated
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Get total events received.
    #[inline]
    pub fn total_events(&self) -> u64 {
        let s = self.snapshot();
        s.mutations + s.destructions + s.instrumentation_changes + s.bulk_sweeps
    }

    /// Get a snapshot of all statistics.
    pub fn snapshot(&self) -> JitListenerStatsSnapshot {
        JitListenerStatsSnapshot {
            mutations: self.mutations.load(Ordering::Relaxed),
            destructions: self.destructions.load(Ordering::Relaxed),
            instrumentation_changes: self.instrumentation_changes.load(Ordering::Relaxed),
            bulk_sweeps: self.bulk_sweeps.load(Ordering::Relaxed),
            entries_invalidated: self.entries_invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of JIT listener statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitListenerStatsSnapshot {
    /// Total mutation events received
    pub mutations: u64,
    /// Total type destructions received
    pub destructions: u64,
    /// Total instrumentation changes received
    pub instrumentation_changes: u64,
    /// Total bulk sweeps performed
    pub bulk_sweeps: u64,
    /// Total cache entries invalidated
    pub entries_invalidated: u64,
}

// =============================================================================
// Tests
// =============================================================================
