//! Cache entries and their guards.
//!
//! A guard is the part of an entry the probe compares against the receiver.
//! Type guards are laid out as three words (`type id`, `version`, `keys`) so
//! emitted code can inline the comparison.

use super::watcher::WatchHandle;
use cinder_runtime::{KeysId, ModuleId, ModuleObject, TypeId, TypeObject, VersionTag};
use std::sync::Arc;

// =============================================================================
// Guards
// =============================================================================

/// Guard of a type-keyed entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeGuard {
    /// Receiver type.
    pub type_id: TypeId,
    /// Receiver type version at installation.
    pub version: VersionTag,
    /// Receiver dict keys, when the plan indexes split storage.
    pub keys: Option<KeysId>,
}

impl TypeGuard {
    /// Guard for `ty` at its current version.
    #[inline]
    pub fn new(ty: &TypeObject, keys: Option<KeysId>) -> Self {
        Self {
            type_id: ty.id(),
            version: ty.version(),
            keys,
        }
    }

    /// Whether a receiver of type `ty` with dict keys `keys` passes.
    #[inline]
    pub fn matches(&self, ty: &TypeObject, keys: Option<KeysId>) -> bool {
        self.type_id == ty.id()
            && self.version == ty.version()
            && (self.keys.is_none() || self.keys == keys)
    }
}

/// Guard of a module global entry.
///
/// Module entries have no watch, so the tag alone is not enough: a module
/// holding a tag across a counter wrap can draw it again. The wrap epoch
/// tells the two apart.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleGuard {
    /// Module identity.
    pub module_id: ModuleId,
    /// Module dict version at installation.
    pub version: VersionTag,
    /// Wrap epoch of `version`.
    pub epoch: u64,
}

impl ModuleGuard {
    /// Guard for `module` at its current version.
    #[inline]
    pub fn new(module: &ModuleObject) -> Self {
        Self {
            module_id: module.id(),
            version: module.version(),
            epoch: module.version_epoch(),
        }
    }

    /// Whether `module` passes.
    #[inline]
    pub fn matches(&self, module: &ModuleObject) -> bool {
        self.module_id == module.id()
            && self.version == module.version()
            && self.epoch == module.version_epoch()
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A guard, the plan to replay on a hit and the watch keeping it honest.
#[derive(Debug)]
pub struct CacheEntry<G, P> {
    /// Probe guard.
    pub guard: G,
    /// Shared so a probe can run it after releasing the site lock.
    pub plan: Arc<P>,
    watch: Option<WatchHandle>,
}

impl<G, P> CacheEntry<G, P> {
    /// Entry kept valid by `watch`.
    #[inline]
    pub fn watched(guard: G, plan: Arc<P>, watch: WatchHandle) -> Self {
        Self {
            guard,
            plan,
            watch: Some(watch),
        }
    }

    /// Entry whose guard alone decides validity.
    #[inline]
    pub fn unwatched(guard: G, plan: Arc<P>) -> Self {
        Self {
            guard,
            plan,
            watch: None,
        }
    }

    /// False once a watched type fired.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.watch.as_ref().is_none_or(WatchHandle::is_valid)
    }
}
