//! Module objects.
//!
//! A module's global dictionary carries a version tag from the same
//! allocator as types; every store or delete replaces it. The tag's wrap
//! epoch is kept next to it, since a module can hold a tag across a wrap and
//! draw the same tag again later. Modules created as
//! unwatchable (their dict can change behind the runtime's back) never allow
//! caching.

use crate::version::{NextVersion, VersionTag};
use cinder_core::{CinderError, CinderResult, InternedString, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Module identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ModuleId(u64);

impl ModuleId {
    fn allocate() -> Self {
        Self(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Shared reference to a module.
pub type ModuleRef = Arc<ModuleObject>;

/// A module and its global dictionary.
pub struct ModuleObject {
    id: ModuleId,
    name: InternedString,
    dict: RwLock<FxHashMap<InternedString, Value>>,
    version: AtomicU64,
    epoch: AtomicU64,
    watchable: bool,
}

impl ModuleObject {
    pub(crate) fn new(name: InternedString, watchable: bool, version: NextVersion) -> ModuleRef {
        Arc::new(Self {
            id: ModuleId::allocate(),
            name,
            dict: RwLock::new(FxHashMap::default()),
            version: AtomicU64::new(version.tag.raw()),
            epoch: AtomicU64::new(version.epoch),
            watchable,
        })
    }

    /// Module id.
    #[inline]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Module name.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// Current dict version.
    #[inline]
    pub fn version(&self) -> VersionTag {
        VersionTag::new(self.version.load(Ordering::Acquire))
    }

    /// Wrap epoch of the current version.
    #[inline]
    pub fn version_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_version(&self, version: NextVersion) {
        self.epoch.store(version.epoch, Ordering::Release);
        self.version.store(version.tag.raw(), Ordering::Release);
    }

    /// Whether the dict shape is watchable.
    #[inline]
    pub fn is_watchable(&self) -> bool {
        self.watchable
    }

    /// Read a global.
    #[inline]
    pub fn get(&self, name: &InternedString) -> Option<Value> {
        self.dict.read().get(name).cloned()
    }

    /// Read a global, raising the module's attribute error when absent.
    pub fn get_attr(&self, name: &InternedString) -> CinderResult<Value> {
        self.get(name).ok_or_else(|| {
            CinderError::attribute(format!("module '{}' has no attribute '{}'", self.name, name))
        })
    }

    pub(crate) fn insert(&self, name: InternedString, value: Value) -> Option<Value> {
        self.dict.write().insert(name, value)
    }

    pub(crate) fn remove(&self, name: &InternedString) -> Option<Value> {
        self.dict.write().remove(name)
    }

    /// Number of globals.
    pub fn len(&self) -> usize {
        self.dict.read().len()
    }

    /// Check for no globals.
    pub fn is_empty(&self) -> bool {
        self.dict.read().is_empty()
    }
}

impl fmt::Debug for ModuleObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version())
            .field("epoch", &self.version_epoch())
            .field("watchable", &self.watchable)
            .finish()
    }
}
