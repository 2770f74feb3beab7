//! Type objects.
//!
//! A [`TypeObject`] is the per-type record every cache guard refers to: an
//! identity that is never reused, a version tag replaced on each observable
//! mutation, the base list and linearized MRO, the attribute mapping, the
//! shared split-dict keys and the flag word carrying the instance-shadow bit.
//!
//! Types hold strong references to their bases and weak references to their
//! subclasses. Dropping the last strong reference reports the destruction to
//! the observer hub before the destructor returns.

use super::descriptor::AttrDescriptor;
use super::mro::{IdMro, compute_c3_mro};
use crate::observer::ObserverHub;
use crate::types::KeysObject;
use crate::version::VersionTag;
use cinder_core::{CinderResult, InternedString};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// Type ID
// =============================================================================

static NEXT_TYPE_ID: AtomicU32 = AtomicU32::new(TypeId::FIRST_TYPE);

/// Compact type identifier. Ids are process-unique and never reused, so a
/// guard holding a dead type's id can never match a live receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeId(u32);

impl TypeId {
    /// First id handed out by [`TypeId::allocate`].
    pub const FIRST_TYPE: u32 = 1;

    /// Allocate a fresh id.
    #[inline]
    pub fn allocate() -> Self {
        Self(NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get raw value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Create a TypeId from a raw value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

// =============================================================================
// Type Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags describing type state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// Some instance may store an attribute that a type in the MRO also
        /// defines. Never cleared once set.
        const INSTANCE_MAY_SHADOW = 1 << 0;
        /// Attributes and bases may be reassigned.
        const MUTABLE = 1 << 1;
        /// The destructor has run.
        const DESTROYED = 1 << 2;
        /// Instances carry a `__dict__`.
        const HAS_DICT = 1 << 3;
        /// The type refuses cache dependencies.
        const UNWATCHABLE = 1 << 4;
    }
}

// =============================================================================
// Metaclass MRO Hook
// =============================================================================

/// Shared reference to a type.
pub type TypeRef = Arc<TypeObject>;

/// Metaclass `mro()` override: receives the type and its default C3 order
/// (self first) and returns the order lookups use. The result may omit the
/// type itself.
pub type MroHook = Arc<dyn Fn(&TypeRef, &[TypeRef]) -> Vec<TypeRef> + Send + Sync>;

/// Box a closure as an [`MroHook`].
pub fn mro_hook<F>(f: F) -> MroHook
where
    F: Fn(&TypeRef, &[TypeRef]) -> Vec<TypeRef> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Linearized MRO as type references.
pub type Mro = SmallVec<[TypeRef; 8]>;

// The type itself is stored as a marker to avoid a reference cycle.
#[derive(Clone)]
enum MroItem {
    Own,
    Type(TypeRef),
}

// =============================================================================
// Type Object
// =============================================================================

pub(crate) struct TypeInit {
    pub name: InternedString,
    pub bases: Vec<TypeRef>,
    pub attrs: FxHashMap<InternedString, AttrDescriptor>,
    pub flags: TypeFlags,
    pub slot_count: usize,
    pub version: VersionTag,
    pub mro_hook: Option<MroHook>,
    pub hub: Arc<ObserverHub>,
}

/// Type object: describes a class.
pub struct TypeObject {
    id: TypeId,
    name: InternedString,
    self_ref: Weak<TypeObject>,
    version: AtomicU64,
    flags: AtomicU32,
    bases: RwLock<Vec<TypeRef>>,
    mro: RwLock<SmallVec<[MroItem; 8]>>,
    attrs: RwLock<FxHashMap<InternedString, AttrDescriptor>>,
    keys: RwLock<Option<Arc<KeysObject>>>,
    instance_names: RwLock<FxHashSet<InternedString>>,
    slot_count: usize,
    subclasses: Mutex<Vec<Weak<TypeObject>>>,
    mro_hook: Option<MroHook>,
    hub: Arc<ObserverHub>,
}

impl TypeObject {
    /// Build the object. The MRO is empty until the runtime installs one.
    pub(crate) fn create(init: TypeInit) -> TypeRef {
        let keys = init
            .flags
            .contains(TypeFlags::HAS_DICT)
            .then(KeysObject::empty);
        Arc::new_cyclic(|self_ref| Self {
            id: TypeId::allocate(),
            name: init.name,
            self_ref: self_ref.clone(),
            version: AtomicU64::new(init.version.raw()),
            flags: AtomicU32::new(init.flags.bits()),
            bases: RwLock::new(init.bases),
            mro: RwLock::new(SmallVec::new()),
            attrs: RwLock::new(init.attrs),
            keys: RwLock::new(keys),
            instance_names: RwLock::new(FxHashSet::default()),
            slot_count: init.slot_count,
            subclasses: Mutex::new(Vec::new()),
            mro_hook: init.mro_hook,
            hub: init.hub,
        })
    }

    /// Type id.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// `current_version(t)`.
    #[inline]
    pub fn version(&self) -> VersionTag {
        VersionTag::new(self.version.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_version(&self, tag: VersionTag) {
        self.version.store(tag.raw(), Ordering::Release);
    }

    // =========================================================================
    // Flags
    // =========================================================================

    /// Current flags.
    #[inline]
    pub fn flags(&self) -> TypeFlags {
        TypeFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Set `flag`, returning true if it was previously clear.
    #[inline]
    pub(crate) fn set_flag(&self, flag: TypeFlags) -> bool {
        let prev = self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
        prev & flag.bits() == 0
    }

    /// The instance-shadow bit.
    #[inline]
    pub fn may_shadow(&self) -> bool {
        self.flags().contains(TypeFlags::INSTANCE_MAY_SHADOW)
    }

    /// Whether instances carry a `__dict__`.
    #[inline]
    pub fn has_dict(&self) -> bool {
        self.flags().contains(TypeFlags::HAS_DICT)
    }

    /// Whether caches may register dependencies on this type.
    #[inline]
    pub fn is_watchable(&self) -> bool {
        !self.flags().contains(TypeFlags::UNWATCHABLE)
    }

    /// Whether attributes and bases may be reassigned.
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.flags().contains(TypeFlags::MUTABLE)
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    /// Strong self reference. `None` only while the destructor runs.
    #[inline]
    pub fn self_ref(&self) -> Option<TypeRef> {
        self.self_ref.upgrade()
    }

    /// Direct bases.
    pub fn bases(&self) -> Vec<TypeRef> {
        self.bases.read().clone()
    }

    pub(crate) fn replace_bases(&self, bases: Vec<TypeRef>) -> Vec<TypeRef> {
        std::mem::replace(&mut *self.bases.write(), bases)
    }

    /// The MRO lookups walk. Usually self first and the root last, but a
    /// metaclass hook may supply any order.
    pub fn mro(&self) -> Mro {
        let own = self.self_ref();
        self.mro
            .read()
            .iter()
            .filter_map(|item| match item {
                MroItem::Own => own.clone(),
                MroItem::Type(t) => Some(Arc::clone(t)),
            })
            .collect()
    }

    /// Ids of the MRO.
    pub fn mro_ids(&self) -> IdMro {
        self.mro
            .read()
            .iter()
            .map(|item| match item {
                MroItem::Own => self.id,
                MroItem::Type(t) => t.id,
            })
            .collect()
    }

    /// Whether the MRO contains the type itself.
    pub fn mro_includes_self(&self) -> bool {
        self.mro.read().iter().any(|i| matches!(i, MroItem::Own))
    }

    pub(crate) fn install_mro(&self, mro: &[TypeRef]) {
        let items = mro
            .iter()
            .map(|t| {
                if t.id == self.id {
                    MroItem::Own
                } else {
                    MroItem::Type(Arc::clone(t))
                }
            })
            .collect();
        *self.mro.write() = items;
    }

    /// Metaclass MRO hook, if any.
    #[inline]
    pub fn mro_hook(&self) -> Option<&MroHook> {
        self.mro_hook.as_ref()
    }

    /// Live direct subclasses.
    pub fn subclasses(&self) -> Vec<TypeRef> {
        let mut subs = self.subclasses.lock();
        subs.retain(|w| w.strong_count() > 0);
        subs.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn add_subclass(&self, sub: &TypeRef) {
        self.subclasses.lock().push(Arc::downgrade(sub));
    }

    pub(crate) fn remove_subclass(&self, sub: TypeId) {
        self.subclasses
            .lock()
            .retain(|w| w.upgrade().is_some_and(|t| t.id != sub));
    }

    /// The type plus every live transitive subclass, each listed after all of
    /// its bases that are in the set.
    pub fn subtypes_topological(&self) -> Vec<TypeRef> {
        let Some(root) = self.self_ref() else {
            return Vec::new();
        };

        let mut members: Vec<TypeRef> = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![root];
        while let Some(t) = stack.pop() {
            if seen.insert(t.id) {
                stack.extend(t.subclasses());
                members.push(t);
            }
        }

        let mut indegree: FxHashMap<TypeId, usize> = members
            .iter()
            .map(|t| {
                let n = t.bases.read().iter().filter(|b| seen.contains(&b.id)).count();
                (t.id, n)
            })
            .collect();
        // The root's own bases are outside the set.
        indegree.insert(self.id, 0);

        let by_id: FxHashMap<TypeId, TypeRef> =
            members.iter().map(|t| (t.id, Arc::clone(t))).collect();
        let mut queue: VecDeque<TypeId> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(members.len());
        while let Some(id) = queue.pop_front() {
            let Some(t) = by_id.get(&id) else { continue };
            for sub in t.subclasses() {
                if let Some(n) = indegree.get_mut(&sub.id) {
                    *n = n.saturating_sub(1);
                    if *n == 0 {
                        queue.push_back(sub.id);
                    }
                }
            }
            order.push(Arc::clone(t));
        }
        order
    }

    /// Whether `other` is in this type's MRO.
    pub fn is_subtype_of(&self, other: &TypeObject) -> bool {
        self.id == other.id || self.mro_ids().contains(&other.id)
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// First MRO entry defining `name`, with the hosting type.
    pub fn lookup(&self, name: &InternedString) -> Option<(TypeRef, AttrDescriptor)> {
        self.mro()
            .into_iter()
            .find_map(|t| t.own_attr(name).map(|a| (t, a)))
    }

    /// Whether any MRO entry defines `name`.
    pub fn mro_defines(&self, name: &InternedString) -> bool {
        self.mro().iter().any(|t| t.has_own_attr(name))
    }

    /// Attribute defined directly on this type.
    #[inline]
    pub fn own_attr(&self, name: &InternedString) -> Option<AttrDescriptor> {
        self.attrs.read().get(name).cloned()
    }

    /// Whether `name` is defined directly on this type.
    #[inline]
    pub fn has_own_attr(&self, name: &InternedString) -> bool {
        self.attrs.read().contains_key(name)
    }

    /// Names defined directly on this type.
    pub fn own_attr_names(&self) -> Vec<InternedString> {
        self.attrs.read().keys().cloned().collect()
    }

    /// Attributes defined directly on this type.
    pub fn own_attrs(&self) -> Vec<AttrDescriptor> {
        self.attrs.read().values().cloned().collect()
    }

    pub(crate) fn insert_attr(&self, attr: AttrDescriptor) -> Option<AttrDescriptor> {
        self.attrs.write().insert(attr.name.clone(), attr)
    }

    pub(crate) fn remove_attr(&self, name: &InternedString) -> Option<AttrDescriptor> {
        self.attrs.write().remove(name)
    }

    // =========================================================================
    // Instance Layout
    // =========================================================================

    /// Current shared split-dict keys, if instances have a dict.
    #[inline]
    pub fn keys_object(&self) -> Option<Arc<KeysObject>> {
        self.keys.read().clone()
    }

    pub(crate) fn replace_keys(&self, keys: Arc<KeysObject>) {
        *self.keys.write() = Some(keys);
    }

    /// Number of `__slots__` members in the instance layout.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Whether instances of `other` can be re-typed to this type.
    pub fn layout_compatible(&self, other: &TypeObject) -> bool {
        self.slot_count == other.slot_count && self.has_dict() == other.has_dict()
    }

    pub(crate) fn note_instance_name(&self, name: &InternedString) {
        if !self.instance_names.read().contains(name) {
            self.instance_names.write().insert(name.clone());
        }
    }

    /// Whether some instance of exactly this type ever stored `name` in its
    /// dict.
    pub fn instance_ever_stored(&self, name: &InternedString) -> bool {
        self.instance_names.read().contains(name)
    }

    #[inline]
    pub(crate) fn hub(&self) -> &Arc<ObserverHub> {
        &self.hub
    }
}

impl Drop for TypeObject {
    fn drop(&mut self) {
        self.set_flag(TypeFlags::DESTROYED);
        tracing::trace!(type_id = self.id.raw(), name = %self.name, "type destroyed");
        self.hub.type_destroyed(self.id);
    }
}

impl fmt::Debug for TypeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version())
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// MRO Computation
// =============================================================================

/// Compute the MRO `ty` would have with `bases`, consulting `pending` for
/// ancestors whose MRO is being recomputed in the same batch.
pub(crate) fn compute_mro(
    ty: &TypeRef,
    bases: &[TypeRef],
    pending: &FxHashMap<TypeId, Mro>,
) -> CinderResult<Mro> {
    let current = |t: &TypeRef| -> Mro {
        pending.get(&t.id).cloned().unwrap_or_else(|| t.mro())
    };

    let mut known: FxHashMap<TypeId, TypeRef> = FxHashMap::default();
    known.insert(ty.id, Arc::clone(ty));
    let mut base_mros: FxHashMap<TypeId, IdMro> = FxHashMap::default();
    for base in bases {
        known.insert(base.id, Arc::clone(base));
        let mro = current(base);
        base_mros.insert(base.id, mro.iter().map(|t| t.id).collect());
        for t in mro {
            known.entry(t.id).or_insert(t);
        }
    }

    let base_ids: Vec<TypeId> = bases.iter().map(|b| b.id).collect();
    let ids = compute_c3_mro(
        ty.id,
        &base_ids,
        |b| base_mros.get(&b).cloned(),
        |t| {
            known
                .get(&t)
                .map_or_else(|| format!("{t:?}"), |r| r.name.to_string())
        },
    )?;

    let default: Mro = ids
        .iter()
        .filter_map(|id| known.get(id).cloned())
        .collect();

    Ok(match &ty.mro_hook {
        Some(hook) => hook(ty, &default).into_iter().collect(),
        None => default,
    })
}
