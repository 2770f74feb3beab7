//! `LoadModuleAttr` cache: `module.name`.
//!
//! Guards on module identity plus the module dict version and its wrap
//! epoch. Module writes draw from the same version allocator as types, so a
//! guard is never satisfied by a recycled tag: within an epoch tags are
//! unique, and a tag drawn again after a wrap carries a new epoch.

use super::entry::{CacheEntry, ModuleGuard};
use super::poly_ic::{InsertOutcome, PolyIc};
use super::resolve::{ModulePlan, resolve_module_attr};
use super::{IcContext, IcKind, IcSiteHeader, IcState, SiteStats, SiteStatsSnapshot};
use cinder_core::{CinderResult, InternedString, Value};
use cinder_runtime::ModuleRef;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Module global load site.
pub struct ModuleAttrCache {
    name: InternedString,
    header: IcSiteHeader,
    table: Mutex<PolyIc<CacheEntry<ModuleGuard, ModulePlan>>>,
    stats: SiteStats,
}

impl ModuleAttrCache {
    /// Create an empty site.
    pub fn new(name: InternedString, index: u32, ctx: &IcContext) -> Self {
        Self {
            name,
            header: IcSiteHeader::new(index, IcKind::LoadModuleAttr),
            table: Mutex::new(PolyIc::new(
                ctx.poly_capacity,
                ctx.eviction_limit,
                ctx.eviction_window,
            )),
            stats: SiteStats::default(),
        }
    }

    /// Global name.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// Site header.
    #[inline]
    pub fn header(&self) -> &IcSiteHeader {
        &self.header
    }

    /// Counter snapshot.
    #[inline]
    pub fn stats(&self) -> SiteStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of installed entries.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Check if no entry is installed.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// `probe_load_module_attr(site, module, name)`.
    pub fn probe(&self, module: &ModuleRef) -> CinderResult<Value> {
        let hit = {
            let mut table = self.table.lock();
            table.tick();
            table
                .find(|e| e.guard.matches(module))
                .map(|e| Arc::clone(&e.plan))
        };
        if let Some(plan) = hit {
            self.stats.record_hit();
            return plan.execute(module, &self.name);
        }

        self.stats.record_miss();
        self.header.record_miss();
        // Read before resolving: a write racing the resolution then leaves
        // an entry that never matches.
        let guard = ModuleGuard::new(module);
        let plan = resolve_module_attr(module, &self.name);
        if !plan.is_cacheable() {
            self.stats.record_refused();
            return plan.execute(module, &self.name);
        }

        let plan = Arc::new(plan);
        self.install(guard, &plan);
        plan.execute(module, &self.name)
    }

    fn install(&self, guard: ModuleGuard, plan: &Arc<ModulePlan>) {
        let (outcome, len) = {
            let mut table = self.table.lock();
            // Entries for an older version of the same module can never hit
            // again.
            let stale = table.retain(|e| e.guard.module_id != guard.module_id);
            if stale > 0 {
                self.stats.record_invalidations(stale as u64);
            }
            let entry = CacheEntry::unwatched(guard, Arc::clone(plan));
            let outcome = table.insert(entry);
            (outcome, table.len())
        };
        match outcome {
            InsertOutcome::Inserted => {}
            InsertOutcome::Evicted => self.stats.record_eviction(),
            InsertOutcome::Megamorphic => {
                self.stats.record_refused();
                self.header.transition_to(IcState::Megamorphic);
                tracing::debug!(
                    site = self.header.site_index,
                    name = %self.name,
                    "module cache site went megamorphic"
                );
                return;
            }
        }
        self.stats.record_install();
        self.header.transition_to(if len > 1 {
            IcState::Polymorphic
        } else {
            IcState::Monomorphic
        });
    }

    /// Drop every entry and return the site to its initial state.
    pub fn mark_cold(&self) -> usize {
        let dropped = {
            let mut table = self.table.lock();
            let n = table.len();
            table.clear();
            n
        };
        self.header.reset();
        dropped
    }
}

impl fmt::Debug for ModuleAttrCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleAttrCache")
            .field("name", &self.name)
            .field("state", &self.header.state())
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ic::test_context;
    use cinder_core::intern;
    use cinder_runtime::Runtime;

    #[test]
    fn test_module_hit_and_version_miss() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let m = rt.new_module("m", true);
        rt.module_set(&m, "x", Value::int(1));
        let cache = ModuleAttrCache::new(intern("x"), 0, &ctx);

        assert_eq!(cache.probe(&m).unwrap(), Value::int(1));
        assert_eq!(cache.probe(&m).unwrap(), Value::int(1));
        assert_eq!(cache.stats().hits, 1);

        rt.module_set(&m, "x", Value::int(2));
        assert_eq!(cache.probe(&m).unwrap(), Value::int(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_write_between_guard_and_install() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let m = rt.new_module("m", true);
        rt.module_set(&m, "x", Value::int(1));
        let cache = ModuleAttrCache::new(intern("x"), 0, &ctx);

        let guard = ModuleGuard::new(&m);
        let plan = Arc::new(resolve_module_attr(&m, &intern("x")));
        rt.module_set(&m, "x", Value::int(2));
        cache.install(guard, &plan);

        assert_eq!(cache.probe(&m).unwrap(), Value::int(2));
        assert_eq!(cache.probe(&m).unwrap(), Value::int(2));
    }

    #[test]
    fn test_missing_global() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let m = rt.new_module("m", true);
        let cache = ModuleAttrCache::new(intern("y"), 0, &ctx);

        for _ in 0..2 {
            assert_eq!(
                cache.probe(&m).unwrap_err(),
                rt.module_get_attr(&m, &intern("y")).unwrap_err()
            );
        }
        rt.module_set(&m, "y", Value::int(3));
        assert_eq!(cache.probe(&m).unwrap(), Value::int(3));
    }

    #[test]
    fn test_unwatchable_module() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let m = rt.new_module("m", false);
        rt.module_set(&m, "x", Value::int(1));
        let cache = ModuleAttrCache::new(intern("x"), 0, &ctx);

        assert_eq!(cache.probe(&m).unwrap(), Value::int(1));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().refused, 1);
    }

    #[test]
    fn test_several_modules() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let cache = ModuleAttrCache::new(intern("x"), 0, &ctx);
        let modules: Vec<ModuleRef> = (0..3)
            .map(|i| {
                let m = rt.new_module(&format!("m{i}"), true);
                rt.module_set(&m, "x", Value::int(i));
                m
            })
            .collect();

        for _ in 0..2 {
            for (i, m) in modules.iter().enumerate() {
                assert_eq!(cache.probe(m).unwrap(), Value::int(i as i64));
            }
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.header().state(), IcState::Polymorphic);
    }
}
