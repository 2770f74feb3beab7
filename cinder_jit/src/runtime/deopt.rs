//! Global deoptimization coordinator.
//!
//! Two event streams reach compiled code through here:
//!
//! - **Instrumentation**: the first hook deoptimizes every compiled function
//!   and blocks compilation; clearing the last hook permits it again.
//! - **Bulk invalidation**: every site of every compiled function is marked
//!   cold while the functions stay compiled.

use super::code_cache::CodeCache;
use cinder_runtime::BulkReason;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Coordinates whole-JIT transitions.
#[derive(Debug)]
pub struct DeoptCoordinator {
    code_cache: Arc<CodeCache>,
    compilation_allowed: AtomicBool,
    deopt_events: AtomicU64,
    functions_deopted: AtomicU64,
    cold_sweeps: AtomicU64,
    entries_dropped: AtomicU64,
}

impl DeoptCoordinator {
    /// Create a coordinator over `code_cache`. `instrumented` is the
    /// runtime's hook state at creation.
    pub fn new(code_cache: Arc<CodeCache>, instrumented: bool) -> Self {
        Self {
            code_cache,
            compilation_allowed: AtomicBool::new(!instrumented),
            deopt_events: AtomicU64::new(0),
            functions_deopted: AtomicU64::new(0),
            cold_sweeps: AtomicU64::new(0),
            entries_dropped: AtomicU64::new(0),
        }
    }

    /// Check if new compilations may be published.
    #[inline]
    pub fn compilation_allowed(&self) -> bool {
        self.compilation_allowed.load(Ordering::Acquire)
    }

    /// `instrumentation_state_changed(active)`.
    ///
    /// Compilation is blocked before any function is deoptimized, so a
    /// concurrent dispatch cannot publish new compiled code afterwards.
    pub fn instrumentation_changed(&self, active: bool) -> usize {
        if !active {
            self.compilation_allowed.store(true, Ordering::Release);
            tracing::debug!("instrumentation cleared, recompilation permitted");
            return 0;
        }
        self.compilation_allowed.store(false, Ordering::Release);
        let count = self.code_cache.deopt_all();
        self.deopt_events.fetch_add(1, Ordering::Relaxed);
        self.functions_deopted
            .fetch_add(count as u64, Ordering::Relaxed);
        tracing::debug!(functions = count, "instrumentation active, deoptimized all");
        count
    }

    /// Mark every site of every compiled function cold.
    pub fn mark_all_cold(&self, reason: BulkReason) -> usize {
        let dropped = self.code_cache.mark_all_cold();
        self.cold_sweeps.fetch_add(1, Ordering::Relaxed);
        self.entries_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        tracing::debug!(?reason, entries = dropped, "all cache sites marked cold");
        dropped
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DeoptStats {
        DeoptStats {
            compilation_allowed: self.compilation_allowed(),
            deopt_events: self.deopt_events.load(Ordering::Relaxed),
            functions_deopted: self.functions_deopted.load(Ordering::Relaxed),
            cold_sweeps: self.cold_sweeps.load(Ordering::Relaxed),
            entries_dropped: self.entries_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeoptStats {
    /// Current compilation permission.
    pub compilation_allowed: bool,
    /// Instrumentation activations handled.
    pub deopt_events: u64,
    /// Functions deoptimized by instrumentation.
    pub functions_deopted: u64,
    /// Bulk cold sweeps.
    pub cold_sweeps: u64,
    /// Cache entries dropped by cold sweeps.
    pub entries_dropped: u64,
}
