//! Code cache for storing and indexing compiled functions.
//!
//! The code cache provides:
//! - O(1) lookup of compiled functions by code ID
//! - Ownership of each function's inline cache sites
//! - Whole-cache deoptimization for the deopt coordinator

use crate::ic::{IcContext, IcManager, SiteSpec};
use cinder_core::{InternedString, intern};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// =============================================================================
// Code Object
// =============================================================================

/// Identity of a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeId(u64);

impl CodeId {
    /// Raw id.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

static NEXT_CODE_ID: AtomicU64 = AtomicU64::new(1);

/// A function body as the interpreter sees it: a name, the layout of its
/// attribute access sites and a call counter.
#[derive(Debug)]
pub struct CodeObject {
    id: CodeId,
    name: InternedString,
    layout: Vec<SiteSpec>,
    calls: AtomicU64,
}

impl CodeObject {
    /// Create a code object with the given site layout.
    pub fn new(name: &str, layout: Vec<SiteSpec>) -> Arc<Self> {
        Arc::new(Self {
            id: CodeId(NEXT_CODE_ID.fetch_add(1, Ordering::Relaxed)),
            name: intern(name),
            layout,
            calls: AtomicU64::new(0),
        })
    }

    /// Code id.
    #[inline]
    pub fn id(&self) -> CodeId {
        self.id
    }

    /// Function name.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// Site layout.
    #[inline]
    pub fn layout(&self) -> &[SiteSpec] {
        &self.layout
    }

    /// Site declaration at `index`.
    #[inline]
    pub fn site(&self, index: usize) -> Option<&SiteSpec> {
        self.layout.get(index)
    }

    /// Count a call and return the new total.
    #[inline]
    pub fn record_call(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Calls so far.
    #[inline]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Compiled Function
// =============================================================================

/// Compiled form of a [`CodeObject`]: its inline cache sites.
///
/// A function stays live until deoptimized. A deoptimized function keeps no
/// cache entries and its sites are unreachable through [`Self::sites`].
pub struct CompiledFunction {
    code: Arc<CodeObject>,
    sites: IcManager,
    live: AtomicBool,
}

impl CompiledFunction {
    /// Allocate the sites of `code`.
    pub fn compile(code: &Arc<CodeObject>, ctx: &IcContext, max_sites: usize) -> Self {
        Self {
            code: Arc::clone(code),
            sites: IcManager::from_layout(code.layout(), ctx, max_sites),
            live: AtomicBool::new(true),
        }
    }

    /// Source code object.
    #[inline]
    pub fn code(&self) -> &Arc<CodeObject> {
        &self.code
    }

    /// Check if the function may still run compiled.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// The function's sites, or `None` once deoptimized.
    #[inline]
    pub fn sites(&self) -> Option<&IcManager> {
        self.is_live().then_some(&self.sites)
    }

    /// Site statistics, readable after deoptimization.
    #[inline]
    pub fn ic_stats(&self) -> crate::ic::IcStats {
        self.sites.stats()
    }

    /// Stop compiled execution and drop every cache entry. Returns the
    /// number of entries dropped.
    pub fn deoptimize(&self) -> usize {
        self.live.store(false, Ordering::Release);
        self.sites.mark_all_cold()
    }

    /// Drop every cache entry; the function stays live.
    #[inline]
    pub fn mark_cold(&self) -> usize {
        self.sites.mark_all_cold()
    }
}

impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("code", &self.code.name())
            .field("live", &self.is_live())
            .field("sites", &self.sites.len())
            .finish()
    }
}

// =============================================================================
// Code Cache
// =============================================================================

/// A cache of compiled functions keyed by code id.
///
/// Thread-safe via internal locking.
#[derive(Debug, Default)]
pub struct CodeCache {
    /// Map from code ID to compiled function.
    entries: RwLock<FxHashMap<CodeId, Arc<CompiledFunction>>>,
    /// Lookup hit counter.
    hits: AtomicU64,
    /// Lookup miss counter.
    misses: AtomicU64,
    /// Insert counter.
    insertions: AtomicU64,
    /// Deoptimized function counter.
    deopts: AtomicU64,
}

impl CodeCache {
    /// Create an empty code cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up compiled code by code ID.
    #[inline]
    pub fn lookup(&self, id: CodeId) -> Option<Arc<CompiledFunction>> {
        let result = self.entries.read().get(&id).cloned();
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Insert a compiled function.
    ///
    /// Returns the previous entry if one existed; it is deoptimized.
    pub fn insert(&self, function: Arc<CompiledFunction>) -> Option<Arc<CompiledFunction>> {
        let id = function.code().id();
        let old = self.entries.write().insert(id, function);
        self.insertions.fetch_add(1, Ordering::Relaxed);
        if let Some(prev) = &old {
            prev.deoptimize();
            self.deopts.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    /// Remove and deoptimize a compiled function.
    pub fn remove(&self, id: CodeId) -> Option<Arc<CompiledFunction>> {
        let removed = self.entries.write().remove(&id);
        if let Some(function) = &removed {
            function.deoptimize();
            self.deopts.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove and deoptimize every compiled function. Returns the number of
    /// functions deoptimized.
    pub fn deopt_all(&self) -> usize {
        let drained: Vec<_> = self.entries.write().drain().map(|(_, f)| f).collect();
        for function in &drained {
            function.deoptimize();
        }
        self.deopts
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained.len()
    }

    /// Mark every site of every compiled function cold. Returns the number
    /// of cache entries dropped.
    pub fn mark_all_cold(&self) -> usize {
        // Site locks are taken outside the map lock.
        self.entries().iter().map(|f| f.mark_cold()).sum()
    }

    /// Get the number of entries in the cache.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    #[inline]
    pub fn stats(&self) -> CodeCacheStats {
        CodeCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            deopts: self.deopts.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<Arc<CompiledFunction>> {
        self.entries.read().values().cloned().collect()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for the code cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeCacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of insertions.
    pub insertions: u64,
    /// Number of functions deoptimized.
    pub deopts: u64,
}

impl CodeCacheStats {
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
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ic::test_context;
    use cinder_core::Value;
    use cinder_runtime::{Runtime, TypeSpec};

    fn code() -> Arc<CodeObject> {
        CodeObject::new("f", vec![SiteSpec::load_attr("x")])
    }

    #[test]
    fn test_code_object_ids_unique() {
        let (a, b) = (code(), code());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.record_call(), 1);
        assert_eq!(a.record_call(), 2);
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 0);
        assert_eq!(a.site(0), Some(&SiteSpec::load_attr("x")));
    }

    #[test]
    fn test_code_cache_insert_lookup() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let cache = CodeCache::new();
        let code = code();

        assert!(cache.lookup(code.id()).is_none());
        let f = Arc::new(CompiledFunction::compile(&code, &ctx, 16));
        assert!(cache.insert(f).is_none());
        assert!(cache.lookup(code.id()).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_code_cache_remove_deoptimizes() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let cache = CodeCache::new();
        let code = code();
        let f = Arc::new(CompiledFunction::compile(&code, &ctx, 16));
        cache.insert(Arc::clone(&f));

        let removed = cache.remove(code.id()).unwrap();
        assert!(Arc::ptr_eq(&removed, &f));
        assert!(!f.is_live());
        assert!(f.sites().is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().deopts, 1);
    }

    #[test]
    fn test_deopt_all_drops_entries() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let cache = CodeCache::new();
        let a = rt.new_type(TypeSpec::new("A").attr("x", Value::int(1))).unwrap();
        let inst = rt.new_instance(&a);

        let code = code();
        let f = Arc::new(CompiledFunction::compile(&code, &ctx, 16));
        cache.insert(Arc::clone(&f));
        let site = f.sites().unwrap().load_attr(0).unwrap();
        site.probe(&ctx, &inst).unwrap();
        assert_eq!(ctx.graph.stats().registrations, 1);

        assert_eq!(cache.deopt_all(), 1);
        assert!(cache.is_empty());
        assert!(!f.is_live());
        assert_eq!(ctx.graph.stats().registrations, 0);
    }

    #[test]
    fn test_mark_all_cold_keeps_functions() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let cache = CodeCache::new();
        let a = rt.new_type(TypeSpec::new("A").attr("x", Value::int(1))).unwrap();
        let inst = rt.new_instance(&a);

        let f = Arc::new(CompiledFunction::compile(&code(), &ctx, 16));
        cache.insert(Arc::clone(&f));
        f.sites().unwrap().load_attr(0).unwrap().probe(&ctx, &inst).unwrap();

        assert_eq!(cache.mark_all_cold(), 1);
        assert_eq!(cache.len(), 1);
        assert!(f.is_live());
        assert!(f.sites().unwrap().get(0).unwrap().is_empty());
    }
}
