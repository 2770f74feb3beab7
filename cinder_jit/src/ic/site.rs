//! Type-keyed cache site.
//!
//! The shared machinery behind the attribute load, store and method caches:
//! a lock-protected polymorphic table of `(TypeGuard, plan, watch)` entries.
//!
//! Probe protocol:
//!
//! ```text
//! lock ─▶ drop invalid entries ─▶ find guard match ─▶ clone plan ─▶ unlock
//!                                                                    │
//!                                          execute plan (may run user code)
//! ```
//!
//! The table lock is never held while a plan executes, so re-entrant
//! mutation from a descriptor only invalidates entries; the running probe
//! finishes with the plan it already selected.

use super::entry::{CacheEntry, TypeGuard};
use super::poly_ic::{InsertOutcome, PolyIc};
use super::resolve::Resolution;
use super::{IcContext, IcKind, IcSiteHeader, IcState, SiteStats, SiteStatsSnapshot};
use crate::error::{IcError, IcResult};
use cinder_core::InternedString;
use cinder_runtime::{KeysId, TypeObject, TypeRef, VersionTag};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A polymorphic cache keyed by receiver type.
pub struct TypeSite<P> {
    name: InternedString,
    header: IcSiteHeader,
    table: Mutex<PolyIc<CacheEntry<TypeGuard, P>>>,
    stats: SiteStats,
}

impl<P> TypeSite<P> {
    /// Create an empty site for attribute `name`.
    pub fn new(name: InternedString, index: u32, kind: IcKind, ctx: &IcContext) -> Self {
        Self {
            name,
            header: IcSiteHeader::new(index, kind),
            table: Mutex::new(PolyIc::new(
                ctx.poly_capacity,
                ctx.eviction_limit,
                ctx.eviction_window,
            )),
            stats: SiteStats::default(),
        }
    }

    /// Attribute name.
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

    /// Guard check. Returns the plan of the matching valid entry.
    pub fn lookup(&self, ty: &TypeObject, keys: Option<KeysId>) -> Option<Arc<P>> {
        let plan = {
            let mut table = self.table.lock();
            table.tick();
            let dropped = table.retain(CacheEntry::is_valid);
            if dropped > 0 {
                self.stats.record_invalidations(dropped as u64);
            }
            table
                .find(|e| e.guard.matches(ty, keys))
                .map(|e| Arc::clone(&e.plan))
        };
        match &plan {
            Some(_) => self.stats.record_hit(),
            None => {
                self.stats.record_miss();
                self.header.record_miss();
            }
        }
        plan
    }

    /// Install `resolution` for receivers of `ty`, returning its plan for
    /// immediate execution. Installation is best effort.
    ///
    /// `version` must be read before resolution started: a bump racing the
    /// resolution then leaves an entry that never matches.
    pub fn install(
        &self,
        ctx: &IcContext,
        ty: &TypeRef,
        version: VersionTag,
        resolution: Resolution<P>,
    ) -> Arc<P> {
        let guard = TypeGuard {
            type_id: ty.id(),
            version,
            keys: resolution.guard_keys,
        };
        let plan = Arc::new(resolution.plan);
        if let Err(err) = self.try_install(ctx, guard, &plan, &resolution.dependencies) {
            self.stats.record_refused();
            tracing::trace!(
                site = self.header.site_index,
                name = %self.name,
                error = %err,
                "cache entry not installed"
            );
        }
        plan
    }

    fn try_install(
        &self,
        ctx: &IcContext,
        guard: TypeGuard,
        plan: &Arc<P>,
        dependencies: &[TypeRef],
    ) -> IcResult<()> {
        if self.table.lock().is_megamorphic() {
            return Err(IcError::SiteMegamorphic);
        }
        let watch = ctx.graph.watch(dependencies)?;
        if !watch.is_valid() {
            return Err(IcError::DependencyMoved(guard.type_id));
        }

        let entry = CacheEntry::watched(guard, Arc::clone(plan), watch);
        let (outcome, len) = {
            let mut table = self.table.lock();
            let outcome = table.insert(entry);
            (outcome, table.len())
        };

        match outcome {
            InsertOutcome::Inserted => {}
            InsertOutcome::Evicted => self.stats.record_eviction(),
            InsertOutcome::Megamorphic => {
                self.header.transition_to(IcState::Megamorphic);
                tracing::debug!(
                    site = self.header.site_index,
                    name = %self.name,
                    "cache site went megamorphic"
                );
                return Err(IcError::SiteMegamorphic);
            }
        }

        self.stats.record_install();
        self.header.transition_to(if len > 1 {
            IcState::Polymorphic
        } else {
            IcState::Monomorphic
        });
        tracing::trace!(
            site = self.header.site_index,
            name = %self.name,
            type_id = guard.type_id.raw(),
            entries = len,
            "cache entry installed"
        );
        Ok(())
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

impl<P> fmt::Debug for TypeSite<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSite")
            .field("name", &self.name)
            .field("state", &self.header.state())
            .field("entries", &self.len())
            .finish()
    }
}
