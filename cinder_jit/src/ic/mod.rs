//! Inline Caching (IC) System
//!
//! Specializing attribute caches kept correct by type watchers.
//!
//! # Architecture
//!
//! Each cache site holds a small polymorphic table. Entries guard on the
//! receiver's type identity and version (plus dict keys when the plan
//! indexes split storage) and stay registered in the [`WatcherGraph`]
//! against every type whose mutation could change their answer:
//!
//! ```text
//! Uninitialized → Monomorphic → Polymorphic → Megamorphic
//!                     ↑              ↑              ↑
//!                  1 entry      2-N entries    repeated evictions
//! ```
//!
//! ## Components
//!
//! - **WatcherGraph**: type → entry dependencies with eager deregistration
//! - **resolve**: the resolution oracle producing replayable plans
//! - **LoadAttrCache / StoreAttrCache / LoadMethodCache / ModuleAttrCache**:
//!   the four site kinds
//! - **IcManager**: per-function site allocation and statistics
//! - **JitTypeListener**: routes runtime events into the graph and the
//!   deopt coordinator

pub mod entry;
pub mod listener;
pub mod load_attr;
pub mod load_method;
pub mod module_attr;
pub mod poly_ic;
pub mod resolve;
pub mod site;
pub mod store_attr;
pub mod watcher;

#[cfg(test)]
mod integration_tests;

pub use entry::{CacheEntry, ModuleGuard, TypeGuard};
pub use listener::{JitListenerStats, JitListenerStatsSnapshot, JitTypeListener};
pub use load_attr::LoadAttrCache;
pub use load_method::LoadMethodCache;
pub use module_attr::ModuleAttrCache;
pub use poly_ic::{InsertOutcome, PolyIc, PolyIcEntry};
pub use resolve::{
    DictProbe, LoadPlan, MethodPlan, ModulePlan, Resolution, ResolvedAttr, StorePlan, TypeAttr,
    Visibility, resolve_attr, resolve_load, resolve_method, resolve_module_attr, resolve_store,
};
pub use site::TypeSite;
pub use store_attr::StoreAttrCache;
pub use watcher::{WatchHandle, WatchId, WatcherGraph, WatcherStats};

use crate::config::JitConfig;
use cinder_core::{InternedString, intern};
use cinder_runtime::Runtime;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Default number of entries in a polymorphic table.
pub const POLY_IC_ENTRIES: usize = 4;

// =============================================================================
// IC State
// =============================================================================

/// The state of an inline cache site.
///
/// Once megamorphic, a site stays megamorphic until it is marked cold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum IcState {
    /// Nothing installed yet.
    #[default]
    Uninitialized = 0,
    /// One receiver shape installed.
    Monomorphic = 1,
    /// Several receiver shapes installed.
    Polymorphic = 2,
    /// Caching disabled; every probe resolves.
    Megamorphic = 3,
}

impl IcState {
    /// Convert from raw u8 value.
    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Monomorphic,
            2 => Self::Polymorphic,
            _ => Self::Megamorphic,
        }
    }

    /// Check if this state has type feedback.
    #[inline]
    pub const fn has_feedback(self) -> bool {
        !matches!(self, Self::Uninitialized)
    }

    /// Check if IC can still specialize (not megamorphic).
    #[inline]
    pub const fn can_specialize(self) -> bool {
        !matches!(self, Self::Megamorphic)
    }
}

// =============================================================================
// IC Kind
// =============================================================================

/// The kind of operation an IC caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IcKind {
    /// `obj.attr`
    LoadAttr = 0,
    /// `obj.attr = value`
    StoreAttr = 1,
    /// `obj.attr(...)` without a bound method.
    LoadMethod = 2,
    /// `module.attr`
    LoadModuleAttr = 3,
}

impl IcKind {
    /// Check if the site is keyed by receiver type.
    #[inline]
    pub const fn is_type_keyed(self) -> bool {
        !matches!(self, Self::LoadModuleAttr)
    }
}

// =============================================================================
// IC Site Header
// =============================================================================

/// Compact header for an IC site (16 bytes).
#[repr(C, align(16))]
#[derive(Debug)]
pub struct IcSiteHeader {
    /// Position of the site in its function's layout.
    pub site_index: u32,
    /// Kind of operation being cached.
    pub kind: IcKind,
    /// Current IC state (atomic for lock-free transitions).
    state: AtomicU8,
    /// Miss count, saturating.
    miss_count: AtomicU8,
    _reserved: u8,
}

impl IcSiteHeader {
    /// Create a new uninitialized header.
    #[inline]
    pub fn new(site_index: u32, kind: IcKind) -> Self {
        Self {
            site_index,
            kind,
            state: AtomicU8::new(IcState::Uninitialized as u8),
            miss_count: AtomicU8::new(0),
            _reserved: 0,
        }
    }

    /// Get current IC state.
    #[inline]
    pub fn state(&self) -> IcState {
        IcState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Atomically transition to a new state.
    ///
    /// Returns true if transition succeeded, false if state was already higher.
    #[inline]
    pub fn transition_to(&self, new_state: IcState) -> bool {
        let new = new_state as u8;
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= new {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Increment miss count and return new value.
    #[inline]
    pub fn record_miss(&self) -> u8 {
        // fetch_add wraps; saturate instead.
        loop {
            let current = self.miss_count.load(Ordering::Relaxed);
            if current == u8::MAX {
                return current;
            }
            if self
                .miss_count
                .compare_exchange_weak(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return current + 1;
            }
        }
    }

    /// Get current miss count.
    #[inline]
    pub fn miss_count(&self) -> u8 {
        self.miss_count.load(Ordering::Relaxed)
    }

    /// Reset to uninitialized.
    #[inline]
    pub fn reset(&self) {
        self.state
            .store(IcState::Uninitialized as u8, Ordering::Release);
        self.miss_count.store(0, Ordering::Relaxed);
    }
}

// =============================================================================
// Site Statistics
// =============================================================================

/// Per-site counters.
#[derive(Debug, Default)]
pub struct SiteStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    installs: AtomicU64,
    refused: AtomicU64,
}

impl SiteStats {
    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_invalidations(&self, n: u64) {
        self.invalidations.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_install(&self) {
        self.installs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot.
    pub fn snapshot(&self) -> SiteStatsSnapshot {
        SiteStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            installs: self.installs.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SiteStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStatsSnapshot {
    /// Probes answered by an entry.
    pub hits: u64,
    /// Probes that resolved.
    pub misses: u64,
    /// Invalid entries dropped.
    pub invalidations: u64,
    /// Valid entries evicted for room.
    pub evictions: u64,
    /// Entries installed.
    pub installs: u64,
    /// Installs skipped (unwatchable, megamorphic, destroyed).
    pub refused: u64,
}

/// Statistics for the sites of one function.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcStats {
    /// Total number of IC sites.
    pub total_sites: u32,
    /// Sites in monomorphic state.
    pub monomorphic: u32,
    /// Sites in polymorphic state.
    pub polymorphic: u32,
    /// Sites in megamorphic state.
    pub megamorphic: u32,
    /// Total cache hits.
    pub hits: u64,
    /// Total cache misses.
    pub misses: u64,
    /// Total entries dropped as invalid.
    pub invalidations: u64,
}

impl IcStats {
    /// Calculate hit rate.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// IC Context
// =============================================================================

/// Everything a probe needs besides its site.
#[derive(Debug, Clone)]
pub struct IcContext {
    /// Host runtime, for reference paths and dict stores.
    pub runtime: Arc<Runtime>,
    /// Dependency graph entries register in.
    pub graph: Arc<WatcherGraph>,
    /// Entries per site.
    pub poly_capacity: usize,
    /// Evictions that demote a site.
    pub eviction_limit: u32,
    /// Probe window for `eviction_limit`.
    pub eviction_window: u64,
}

impl IcContext {
    /// Create a context from configuration.
    pub fn new(runtime: Arc<Runtime>, graph: Arc<WatcherGraph>, config: &JitConfig) -> Self {
        Self {
            runtime,
            graph,
            poly_capacity: config.poly_capacity,
            eviction_limit: config.megamorphic_eviction_limit,
            eviction_window: config.eviction_window,
        }
    }
}

/// Context over a fresh graph observing `runtime` directly.
#[cfg(test)]
pub(crate) fn test_context(runtime: &Arc<Runtime>) -> IcContext {
    let graph = WatcherGraph::new();
    runtime.register_observer(graph.clone());
    IcContext::new(Arc::clone(runtime), graph, &JitConfig::for_testing())
}

// =============================================================================
// IC Site
// =============================================================================

/// Declaration of one site in a code object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    /// Operation.
    pub kind: IcKind,
    /// Attribute or global name.
    pub name: InternedString,
}

impl SiteSpec {
    /// `obj.name`
    pub fn load_attr(name: &str) -> Self {
        Self {
            kind: IcKind::LoadAttr,
            name: intern(name),
        }
    }

    /// `obj.name = value`
    pub fn store_attr(name: &str) -> Self {
        Self {
            kind: IcKind::StoreAttr,
            name: intern(name),
        }
    }

    /// `obj.name(...)`
    pub fn load_method(name: &str) -> Self {
        Self {
            kind: IcKind::LoadMethod,
            name: intern(name),
        }
    }

    /// `module.name`
    pub fn load_module_attr(name: &str) -> Self {
        Self {
            kind: IcKind::LoadModuleAttr,
            name: intern(name),
        }
    }
}

/// One cache site of a compiled function.
#[derive(Debug)]
pub enum IcSite {
    /// Attribute load.
    LoadAttr(LoadAttrCache),
    /// Attribute store.
    StoreAttr(StoreAttrCache),
    /// Method load.
    LoadMethod(LoadMethodCache),
    /// Module global load.
    LoadModuleAttr(ModuleAttrCache),
}

impl IcSite {
    /// Create an empty site for `spec`.
    pub fn new(spec: &SiteSpec, index: u32, ctx: &IcContext) -> Self {
        let name = spec.name.clone();
        match spec.kind {
            IcKind::LoadAttr => Self::LoadAttr(LoadAttrCache::new(name, index, ctx)),
            IcKind::StoreAttr => Self::StoreAttr(StoreAttrCache::new(name, index, ctx)),
            IcKind::LoadMethod => Self::LoadMethod(LoadMethodCache::new(name, index, ctx)),
            IcKind::LoadModuleAttr => {
                Self::LoadModuleAttr(ModuleAttrCache::new(name, index, ctx))
            }
        }
    }

    /// Site header.
    pub fn header(&self) -> &IcSiteHeader {
        match self {
            Self::LoadAttr(s) => s.header(),
            Self::StoreAttr(s) => s.header(),
            Self::LoadMethod(s) => s.header(),
            Self::LoadModuleAttr(s) => s.header(),
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SiteStatsSnapshot {
        match self {
            Self::LoadAttr(s) => s.stats(),
            Self::StoreAttr(s) => s.stats(),
            Self::LoadMethod(s) => s.stats(),
            Self::LoadModuleAttr(s) => s.stats(),
        }
    }

    /// Number of installed entries.
    pub fn len(&self) -> usize {
        match self {
            Self::LoadAttr(s) => s.len(),
            Self::StoreAttr(s) => s.len(),
            Self::LoadMethod(s) => s.len(),
            Self::LoadModuleAttr(s) => s.len(),
        }
    }

    /// Check if no entry is installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and reset the header.
    pub fn mark_cold(&self) -> usize {
        match self {
            Self::LoadAttr(s) => s.mark_cold(),
            Self::StoreAttr(s) => s.mark_cold(),
            Self::LoadMethod(s) => s.mark_cold(),
            Self::LoadModuleAttr(s) => s.mark_cold(),
        }
    }
}

// =============================================================================
// IC Manager
// =============================================================================

/// Manages the IC sites of a single compiled function.
#[derive(Debug)]
pub struct IcManager {
    sites: Vec<IcSite>,
}

impl IcManager {
    /// Allocate one site per `layout` entry, up to `max_sites`. Later sites
    /// run uncached.
    pub fn from_layout(layout: &[SiteSpec], ctx: &IcContext, max_sites: usize) -> Self {
        let sites = layout
            .iter()
            .take(max_sites)
            .enumerate()
            .map(|(i, spec)| IcSite::new(spec, i as u32, ctx))
            .collect();
        Self { sites }
    }

    /// Get an IC site by index.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&IcSite> {
        self.sites.get(index)
    }

    /// Attribute load site at `index`.
    #[inline]
    pub fn load_attr(&self, index: usize) -> Option<&LoadAttrCache> {
        match self.sites.get(index) {
            Some(IcSite::LoadAttr(s)) => Some(s),
            _ => None,
        }
    }

    /// Attribute store site at `index`.
    #[inline]
    pub fn store_attr(&self, index: usize) -> Option<&StoreAttrCache> {
        match self.sites.get(index) {
            Some(IcSite::StoreAttr(s)) => Some(s),
            _ => None,
        }
    }

    /// Method load site at `index`.
    #[inline]
    pub fn load_method(&self, index: usize) -> Option<&LoadMethodCache> {
        match self.sites.get(index) {
            Some(IcSite::LoadMethod(s)) => Some(s),
            _ => None,
        }
    }

    /// Module global site at `index`.
    #[inline]
    pub fn load_module_attr(&self, index: usize) -> Option<&ModuleAttrCache> {
        match self.sites.get(index) {
            Some(IcSite::LoadModuleAttr(s)) => Some(s),
            _ => None,
        }
    }

    /// Get the number of IC sites.
    #[inline]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Drop every entry of every site. Returns the number of entries dropped.
    pub fn mark_all_cold(&self) -> usize {
        self.sites.iter().map(IcSite::mark_cold).sum()
    }

    /// Get statistics snapshot.
    pub fn stats(&self) -> IcStats {
        let mut stats = IcStats {
            total_sites: self.sites.len() as u32,
            ..Default::default()
        };
        for site in &self.sites {
            match site.header().state() {
                IcState::Monomorphic => stats.monomorphic += 1,
                IcState::Polymorphic => stats.polymorphic += 1,
                IcState::Megamorphic => stats.megamorphic += 1,
                IcState::Uninitialized => {}
            }
            let s = site.stats();
            stats.hits += s.hits;
            stats.misses += s.misses;
            stats.invalidations += s.invalidations;
        }
        stats
    }

    /// Iterate over all IC sites.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &IcSite> {
        self.sites.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::Value;
    use cinder_runtime::TypeSpec;

    // -------------------------------------------------------------------------
    // IcState Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_ic_state_from_u8() {
        assert_eq!(IcState::from_u8(0), IcState::Uninitialized);
        assert_eq!(IcState::from_u8(1), IcState::Monomorphic);
        assert_eq!(IcState::from_u8(2), IcState::Polymorphic);
        assert_eq!(IcState::from_u8(3), IcState::Megamorphic);
        assert_eq!(IcState::from_u8(255), IcState::Megamorphic);
    }

    #[test]
    fn test_ic_state_predicates() {
        assert_eq!(IcState::default(), IcState::Uninitialized);
        assert!(!IcState::Uninitialized.has_feedback());
        assert!(IcState::Megamorphic.has_feedback());
        assert!(IcState::Polymorphic.can_specialize());
        assert!(!IcState::Megamorphic.can_specialize());
    }

    #[test]
    fn test_ic_kind_type_keyed() {
        assert!(IcKind::LoadAttr.is_type_keyed());
        assert!(IcKind::LoadMethod.is_type_keyed());
        assert!(!IcKind::LoadModuleAttr.is_type_keyed());
    }

    // -------------------------------------------------------------------------
    // IcSiteHeader Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_ic_site_header_size() {
        assert_eq!(std::mem::size_of::<IcSiteHeader>(), 16);
        assert_eq!(std::mem::align_of::<IcSiteHeader>(), 16);
    }

    #[test]
    fn test_ic_site_header_transition() {
        let header = IcSiteHeader::new(0, IcKind::LoadAttr);
        assert!(header.transition_to(IcState::Monomorphic));
        assert!(header.transition_to(IcState::Polymorphic));
        assert!(!header.transition_to(IcState::Monomorphic));
        assert_eq!(header.state(), IcState::Polymorphic);
        assert!(header.transition_to(IcState::Megamorphic));
        assert!(!header.transition_to(IcState::Uninitialized));
    }

    #[test]
    fn test_ic_site_header_miss_saturation() {
        let header = IcSiteHeader::new(0, IcKind::StoreAttr);
        assert_eq!(header.record_miss(), 1);
        for _ in 0..300 {
            header.record_miss();
        }
        assert_eq!(header.miss_count(), 255);
        header.reset();
        assert_eq!(header.miss_count(), 0);
        assert_eq!(header.state(), IcState::Uninitialized);
    }

    #[test]
    fn test_ic_header_concurrent_transitions() {
        use std::thread;

        let header = Arc::new(IcSiteHeader::new(0, IcKind::LoadAttr));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let h = Arc::clone(&header);
                thread::spawn(move || {
                    h.transition_to(IcState::Monomorphic);
                    h.transition_to(IcState::Polymorphic);
                    h.transition_to(IcState::Megamorphic);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(header.state(), IcState::Megamorphic);
    }

    // -------------------------------------------------------------------------
    // IcManager Tests
    // -------------------------------------------------------------------------

    fn layout() -> Vec<SiteSpec> {
        vec![
            SiteSpec::load_attr("x"),
            SiteSpec::store_attr("x"),
            SiteSpec::load_method("f"),
            SiteSpec::load_module_attr("g"),
        ]
    }

    #[test]
    fn test_ic_manager_from_layout() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let mgr = IcManager::from_layout(&layout(), &ctx, 16);

        assert_eq!(mgr.len(), 4);
        assert!(mgr.load_attr(0).is_some());
        assert!(mgr.load_attr(1).is_none());
        assert!(mgr.store_attr(1).is_some());
        assert!(mgr.load_method(2).is_some());
        assert!(mgr.load_module_attr(3).is_some());
        assert!(mgr.get(4).is_none());
        assert_eq!(mgr.get(2).unwrap().header().kind, IcKind::LoadMethod);
        assert_eq!(mgr.get(3).unwrap().header().site_index, 3);
    }

    #[test]
    fn test_ic_manager_capacity_limit() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let mgr = IcManager::from_layout(&layout(), &ctx, 2);
        assert_eq!(mgr.len(), 2);
        assert!(mgr.load_method(2).is_none());
    }

    #[test]
    fn test_ic_manager_stats_and_cold() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let mgr = IcManager::from_layout(&layout(), &ctx, 16);
        let a = rt.new_type(TypeSpec::new("A").attr("x", Value::int(1))).unwrap();
        let inst = rt.new_instance(&a);

        let site = mgr.load_attr(0).unwrap();
        for _ in 0..5 {
            site.probe(&ctx, &inst).unwrap();
        }
        let stats = mgr.stats();
        assert_eq!(stats.total_sites, 4);
        assert_eq!(stats.monomorphic, 1);
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        assert_eq!(mgr.mark_all_cold(), 1);
        assert_eq!(mgr.stats().monomorphic, 0);
        assert!(mgr.get(0).unwrap().is_empty());
    }

    #[test]
    fn test_ic_stats_hit_rate_empty() {
        assert_eq!(IcStats::default().hit_rate(), 0.0);
    }
}
