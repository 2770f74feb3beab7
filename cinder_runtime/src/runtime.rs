//! The host runtime.
//!
//! [`Runtime`] owns the version allocator and the observer hub, creates
//! types, instances and modules, and implements every mutation primitive the
//! caches must hear about. Each type mutation runs in three steps:
//!
//! ```text
//! notify(ty, kind) + notify(subtypes, AncestorChanged)
//!        │
//!        ▼
//! update state (attrs / bases / MROs / descriptor)
//!        │
//!        ▼
//! bump ty and every live subtype, bases before subclasses
//! ```
//!
//! Observers therefore invalidate dependents before any new version is
//! visible. Mutations serialize on a reentrant lock standing in for the
//! interpreter's global lock; descriptor getters and setters run without
//! any other lock held.
//!
//! The `get_attr` / `set_attr` / `load_method` / `module_get_attr` paths
//! resolve straight from the object model. They are the interpreter's
//! behavior and the reference every cache must agree with.

use crate::config::RuntimeConfig;
use crate::object::{
    AttrDescriptor, AttrPayload, Descriptor, Instance, InstanceRef, ModuleObject, ModuleRef,
    MroHook, Setter, TypeFlags, TypeId, TypeObject, TypeRef,
};
use crate::object::type_obj::{Mro, TypeInit, compute_mro};
use crate::observer::{
    BulkReason, HookKind, MutationKind, ObserverHub, ObserverId, RuntimeObserver,
};
use crate::shadow;
use crate::types::InstanceDict;
use crate::version::{NextVersion, VersionAllocator, VersionTag};
use cinder_core::{CinderError, CinderResult, FunctionObject, InternedString, Value, intern};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// Type Spec
// =============================================================================

/// Description of a class statement.
#[derive(Clone)]
pub struct TypeSpec {
    name: InternedString,
    bases: Vec<TypeRef>,
    attrs: Vec<AttrDescriptor>,
    slots: Vec<InternedString>,
    has_dict: bool,
    watchable: bool,
    mro_hook: Option<MroHook>,
}

impl TypeSpec {
    /// Start a spec. Instances get a `__dict__` and the type is watchable
    /// unless configured otherwise.
    pub fn new(name: &str) -> Self {
        Self {
            name: intern(name),
            bases: Vec::new(),
            attrs: Vec::new(),
            slots: Vec::new(),
            has_dict: true,
            watchable: true,
            mro_hook: None,
        }
    }

    /// Append a base.
    #[must_use]
    pub fn base(mut self, base: &TypeRef) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    /// Define a plain class value.
    #[must_use]
    pub fn attr(mut self, name: &str, value: Value) -> Self {
        self.attrs.push(AttrDescriptor::value(intern(name), value));
        self
    }

    /// Define a method, returning a spec with a fresh function under `name`.
    #[must_use]
    pub fn method(self, name: &str) -> Self {
        let f = FunctionObject::new(intern(name));
        self.attr(name, Value::Function(f))
    }

    /// Define a descriptor.
    #[must_use]
    pub fn descriptor(mut self, name: &str, descriptor: &Arc<Descriptor>) -> Self {
        self.attrs
            .push(AttrDescriptor::descriptor(intern(name), Arc::clone(descriptor)));
        self
    }

    /// Declare `__slots__` members.
    #[must_use]
    pub fn slots(mut self, names: &[&str]) -> Self {
        self.slots.extend(names.iter().map(|n| intern(n)));
        self
    }

    /// Instances get no `__dict__` (unless a base provides one).
    #[must_use]
    pub fn without_dict(mut self) -> Self {
        self.has_dict = false;
        self
    }

    /// Refuse cache dependencies on this type.
    #[must_use]
    pub fn unwatchable(mut self) -> Self {
        self.watchable = false;
        self
    }

    /// Install a metaclass `mro()` override.
    #[must_use]
    pub fn mro_hook(mut self, hook: MroHook) -> Self {
        self.mro_hook = Some(hook);
        self
    }
}

impl fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSpec")
            .field("name", &self.name)
            .field("bases", &self.bases.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("slots", &self.slots)
            .field("has_dict", &self.has_dict)
            .field("watchable", &self.watchable)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Method Pair
// =============================================================================

/// Result of a method load: either an unbound function plus its receiver
/// (no allocation of a bound method), or an ordinary attribute value with no
/// receiver.
#[derive(Clone, Debug)]
pub struct MethodPair {
    /// The callable.
    pub callable: Value,
    /// `Some(self)` when `callable` still needs the receiver prepended.
    pub receiver: Option<InstanceRef>,
}

impl MethodPair {
    /// Unbound function with its receiver.
    pub fn unbound(function: Arc<FunctionObject>, receiver: InstanceRef) -> Self {
        Self {
            callable: Value::Function(function),
            receiver: Some(receiver),
        }
    }

    /// Plain attribute value.
    pub fn attr(value: Value) -> Self {
        Self {
            callable: value,
            receiver: None,
        }
    }

    /// Collapse to the value an ordinary attribute load would produce.
    pub fn into_value(self) -> Value {
        match (self.callable, self.receiver) {
            (Value::Function(f), Some(recv)) => recv.bind(&f),
            (callable, _) => callable,
        }
    }
}

impl PartialEq for MethodPair {
    fn eq(&self, other: &Self) -> bool {
        let same_receiver = match (&self.receiver, &other.receiver) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_receiver && self.callable == other.callable
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// Handle of an installed instrumentation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

// =============================================================================
// Runtime
// =============================================================================

/// The host runtime model.
pub struct Runtime {
    config: RuntimeConfig,
    versions: VersionAllocator,
    hub: Arc<ObserverHub>,
    object_type: TypeRef,
    types: RwLock<FxHashMap<TypeId, Weak<TypeObject>>>,
    hooks: Mutex<FxHashMap<HookId, HookKind>>,
    next_hook: AtomicU64,
    mutator: ReentrantMutex<()>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime.
    pub fn with_config(config: RuntimeConfig) -> Arc<Self> {
        let versions = VersionAllocator::new(config.max_version);
        let hub = Arc::new(ObserverHub::new());
        let object_type = TypeObject::create(TypeInit {
            name: intern("object"),
            bases: Vec::new(),
            attrs: FxHashMap::default(),
            flags: TypeFlags::empty(),
            slot_count: 0,
            version: versions.next().tag,
            mro_hook: None,
            hub: Arc::clone(&hub),
        });
        object_type.install_mro(&[Arc::clone(&object_type)]);

        let mut types = FxHashMap::default();
        types.insert(object_type.id(), Arc::downgrade(&object_type));

        Arc::new(Self {
            config,
            versions,
            hub,
            object_type,
            types: RwLock::new(types),
            hooks: Mutex::new(FxHashMap::default()),
            next_hook: AtomicU64::new(1),
            mutator: ReentrantMutex::new(()),
        })
    }

    /// Configuration.
    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The root type.
    #[inline]
    pub fn object_type(&self) -> &TypeRef {
        &self.object_type
    }

    /// Observer hub shared with every type.
    #[inline]
    pub fn hub(&self) -> &Arc<ObserverHub> {
        &self.hub
    }

    /// Register an observer for runtime events.
    pub fn register_observer(&self, observer: Arc<dyn RuntimeObserver>) -> ObserverId {
        self.hub.register(observer)
    }

    /// Remove an observer.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.hub.unregister(id)
    }

    /// Number of times the version counter wrapped.
    #[inline]
    pub fn version_wraps(&self) -> u64 {
        self.versions.wrap_count()
    }

    /// Live types, the root included.
    pub fn live_types(&self) -> Vec<TypeRef> {
        let mut types = self.types.write();
        types.retain(|_, w| w.strong_count() > 0);
        types.values().filter_map(Weak::upgrade).collect()
    }

    // =========================================================================
    // Version Registry
    // =========================================================================

    /// `current_version(t)`.
    #[inline]
    pub fn current_version(&self, ty: &TypeObject) -> VersionTag {
        ty.version()
    }

    /// Draw a tag different from `old`. A wrap drops every cache before the
    /// recycled tag is handed out.
    fn draw_version(&self, old: VersionTag) -> NextVersion {
        loop {
            let next = self.versions.next();
            if next.wrapped {
                tracing::debug!(
                    max = self.versions.max(),
                    "version counter wrapped, invalidating all caches"
                );
                self.hub.bulk_invalidate(BulkReason::VersionOverflow);
            }
            if next.tag != old {
                return next;
            }
        }
    }

    /// `bump(t)`: explicit mutation of `ty` with no state change.
    pub fn bump(&self, ty: &TypeRef) {
        let _guard = self.mutator.lock();
        let tree = self.notify_tree(ty, MutationKind::Explicit);
        self.bump_tree(&tree);
    }

    /// Report `kind` on `ty` and `AncestorChanged` on every live subtype.
    /// Returns the affected types, bases before subclasses.
    fn notify_tree(&self, ty: &TypeRef, kind: MutationKind) -> Vec<TypeRef> {
        let tree = ty.subtypes_topological();
        for t in &tree {
            if t.id() == ty.id() {
                self.hub.mutation_observed(t.id(), &kind);
            } else {
                self.hub
                    .mutation_observed(t.id(), &MutationKind::AncestorChanged);
            }
        }
        tree
    }

    fn bump_tree(&self, tree: &[TypeRef]) {
        for t in tree {
            let tag = self.draw_version(t.version()).tag;
            tracing::trace!(type_id = t.id().raw(), version = tag.raw(), "bump");
            t.set_version(tag);
        }
    }

    /// Drop every cache.
    pub fn bulk_invalidate(&self) {
        tracing::debug!("manual bulk invalidation");
        self.hub.bulk_invalidate(BulkReason::Manual);
    }

    // =========================================================================
    // Type Creation
    // =========================================================================

    /// Execute a class statement.
    pub fn new_type(&self, spec: TypeSpec) -> CinderResult<TypeRef> {
        let _guard = self.mutator.lock();
        let TypeSpec {
            name,
            mut bases,
            attrs,
            slots,
            has_dict,
            watchable,
            mro_hook,
        } = spec;

        if bases.is_empty() {
            bases.push(Arc::clone(&self.object_type));
        }

        let slotted: Vec<&TypeRef> = bases.iter().filter(|b| b.slot_count() > 0).collect();
        if slotted.len() > 1 {
            return Err(CinderError::type_error(
                "multiple bases have instance lay-out conflict",
            ));
        }
        let base_slots = slotted.first().map_or(0, |b| b.slot_count());

        let mut attr_map: FxHashMap<InternedString, AttrDescriptor> = FxHashMap::default();
        for attr in attrs {
            attr_map.insert(attr.name.clone(), attr);
        }
        for (i, slot) in slots.iter().enumerate() {
            attr_map.insert(slot.clone(), AttrDescriptor::slot(slot.clone(), base_slots + i));
        }

        let mut flags = TypeFlags::MUTABLE;
        if has_dict || bases.iter().any(|b| b.has_dict()) {
            flags |= TypeFlags::HAS_DICT;
        }
        if !watchable {
            flags |= TypeFlags::UNWATCHABLE;
        }

        let ty = TypeObject::create(TypeInit {
            name,
            bases: bases.clone(),
            attrs: attr_map,
            flags,
            slot_count: base_slots + slots.len(),
            version: self.draw_version(VersionTag::UNASSIGNED).tag,
            mro_hook,
            hub: Arc::clone(&self.hub),
        });
        let mro = compute_mro(&ty, &bases, &FxHashMap::default())?;
        ty.install_mro(&mro);
        for base in &bases {
            base.add_subclass(&ty);
        }
        self.types.write().insert(ty.id(), Arc::downgrade(&ty));

        tracing::debug!(
            type_id = ty.id().raw(),
            name = %ty.name(),
            bases = bases.len(),
            "type created"
        );
        Ok(ty)
    }

    /// Create an instance. Its dict starts split over the type's current
    /// shared keys.
    pub fn new_instance(&self, ty: &TypeRef) -> InstanceRef {
        let dict = ty.keys_object().map(InstanceDict::split);
        Instance::new(Arc::clone(ty), dict, ty.slot_count())
    }

    // =========================================================================
    // Type Mutation
    // =========================================================================

    fn check_mutable(ty: &TypeObject, name: &str) -> CinderResult<()> {
        if ty.is_mutable() {
            Ok(())
        } else {
            Err(CinderError::type_error(format!(
                "cannot set '{name}' attribute of immutable type '{}'",
                ty.name()
            )))
        }
    }

    /// `ty.name = value` for any attribute payload.
    pub fn set_type_attr(&self, ty: &TypeRef, attr: AttrDescriptor) -> CinderResult<()> {
        let _guard = self.mutator.lock();
        Self::check_mutable(ty, &attr.name)?;
        let name = attr.name.clone();
        let tree = self.notify_tree(ty, MutationKind::AttrSet(name.clone()));
        let dependents: Vec<TypeRef> = self
            .live_types()
            .into_iter()
            .filter(|t| t.mro_ids().contains(&ty.id()))
            .collect();
        let marked = shadow::note_type_attr_added(ty, &name, &dependents);
        ty.insert_attr(attr);
        self.bump_tree(&tree);
        self.bump_tree(&marked);
        Ok(())
    }

    /// `ty.name = value`.
    pub fn set_type_value(&self, ty: &TypeRef, name: &str, value: Value) -> CinderResult<()> {
        self.set_type_attr(ty, AttrDescriptor::value(intern(name), value))
    }

    /// `del ty.name`.
    pub fn del_type_attr(&self, ty: &TypeRef, name: &str) -> CinderResult<AttrDescriptor> {
        let _guard = self.mutator.lock();
        Self::check_mutable(ty, name)?;
        let name = intern(name);
        if !ty.has_own_attr(&name) {
            return Err(CinderError::attribute(format!(
                "type object '{}' has no attribute '{}'",
                ty.name(),
                name
            )));
        }
        let tree = self.notify_tree(ty, MutationKind::AttrDeleted(name.clone()));
        let removed = ty.remove_attr(&name);
        self.bump_tree(&tree);
        removed.ok_or_else(|| CinderError::internal("attribute vanished during deletion"))
    }

    /// `ty.__bases__ = bases`.
    ///
    /// Validates the new hierarchy first; on error nothing changes.
    pub fn set_bases(&self, ty: &TypeRef, bases: Vec<TypeRef>) -> CinderResult<()> {
        let _guard = self.mutator.lock();
        Self::check_mutable(ty, "__bases__")?;
        if bases.is_empty() {
            return Err(CinderError::type_error(format!(
                "can only assign non-empty tuple to {}.__bases__, not ()",
                ty.name()
            )));
        }

        let tree = ty.subtypes_topological();
        let in_tree: FxHashSet<TypeId> = tree.iter().map(|t| t.id()).collect();
        if bases.iter().any(|b| in_tree.contains(&b.id())) {
            return Err(CinderError::type_error(
                "a __bases__ item causes an inheritance cycle",
            ));
        }

        let (old_slots, _) = base_layout(&ty.bases());
        let (new_slots, new_dict) = base_layout(&bases);
        if old_slots != new_slots || (new_dict && !ty.has_dict()) {
            return Err(CinderError::type_error(format!(
                "__bases__ assignment: '{}' object layout differs from '{}'",
                bases[0].name(),
                ty.name()
            )));
        }

        let mut pending: FxHashMap<TypeId, Mro> = FxHashMap::default();
        for t in &tree {
            let t_bases = if t.id() == ty.id() {
                bases.clone()
            } else {
                t.bases()
            };
            let mro = compute_mro(t, &t_bases, &pending)?;
            pending.insert(t.id(), mro);
        }

        let tree = self.notify_tree(ty, MutationKind::BasesChanged);

        let old = ty.replace_bases(bases.clone());
        for b in &old {
            b.remove_subclass(ty.id());
        }
        for b in &bases {
            b.add_subclass(ty);
        }
        for t in &tree {
            if let Some(mro) = pending.get(&t.id()) {
                t.install_mro(mro);
            }
        }
        shadow::note_bases_changed(ty);
        self.bump_tree(&tree);

        tracing::debug!(
            type_id = ty.id().raw(),
            affected = tree.len(),
            "bases reassigned"
        );
        Ok(())
    }

    /// Give `descriptor` a setter (making it a data descriptor) or take it
    /// away. Every live type hosting the descriptor is mutated.
    pub fn set_descriptor_setter(&self, descriptor: &Arc<Descriptor>, setter: Option<Setter>) {
        let _guard = self.mutator.lock();
        let hosts: Vec<(TypeRef, InternedString)> = self
            .live_types()
            .into_iter()
            .flat_map(|t| {
                t.own_attrs()
                    .into_iter()
                    .filter(|a| a.as_descriptor().is_some_and(|d| Arc::ptr_eq(d, descriptor)))
                    .map(|a| (Arc::clone(&t), a.name))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut affected: Vec<TypeRef> = Vec::new();
        let mut seen = FxHashSet::default();
        for (host, name) in &hosts {
            for t in self.notify_tree(host, MutationKind::DescriptorKindChanged(name.clone())) {
                if seen.insert(t.id()) {
                    affected.push(t);
                }
            }
        }

        descriptor.replace_setter(setter);
        self.bump_tree(&affected);
        tracing::debug!(
            descriptor = descriptor.id(),
            hosts = hosts.len(),
            data = descriptor.is_data(),
            "descriptor kind changed"
        );
    }

    // =========================================================================
    // Instance Mutation
    // =========================================================================

    fn no_dict(ty: &TypeObject) -> CinderError {
        CinderError::no_attribute(ty.name(), "__dict__")
    }

    /// `instance.__dict__ = mapping`.
    ///
    /// Every name of the new mapping passes the shadow tracker before the
    /// dict is published.
    pub fn replace_instance_dict<I>(&self, instance: &InstanceRef, pairs: I) -> CinderResult<()>
    where
        I: IntoIterator<Item = (InternedString, Value)>,
    {
        let _guard = self.mutator.lock();
        let ty = instance.type_of();
        if !instance.has_dict() {
            return Err(Self::no_dict(&ty));
        }
        let pairs: Vec<(InternedString, Value)> = pairs.into_iter().collect();
        let marked: Vec<TypeRef> = pairs
            .iter()
            .flat_map(|(name, _)| shadow::note_instance_write(&ty, name))
            .collect();
        self.bump_tree(&marked);
        self.hub
            .mutation_observed(ty.id(), &MutationKind::InstanceDictReplaced);
        instance.with_dict_mut(|d| *d = Some(InstanceDict::combined(pairs)));
        Ok(())
    }

    /// `instance.__dict__[name] = value`, bypassing descriptors.
    pub fn instance_dict_set(
        &self,
        instance: &InstanceRef,
        name: &InternedString,
        value: Value,
    ) -> CinderResult<()> {
        let ty = instance.type_of();
        if !instance.has_dict() {
            return Err(Self::no_dict(&ty));
        }
        self.store_in_dict(instance, &ty, name, value)
    }

    /// Store into the instance dict, growing the type's shared keys when the
    /// dict is still on them.
    fn store_in_dict(
        &self,
        instance: &InstanceRef,
        ty: &TypeRef,
        name: &InternedString,
        value: Value,
    ) -> CinderResult<()> {
        enum Plan {
            InPlace,
            Grow(Arc<crate::types::KeysObject>),
            Combine,
        }

        let _guard = self.mutator.lock();
        let marked = shadow::note_instance_write(ty, name);
        self.bump_tree(&marked);

        let plan = instance.with_dict_mut(|d| match d.as_ref() {
            None => None,
            Some(InstanceDict::Combined { .. }) => Some(Plan::InPlace),
            Some(InstanceDict::Split { keys, .. }) => Some(if keys.index_of(name).is_some() {
                Plan::InPlace
            } else if ty.keys_object().is_some_and(|tk| Arc::ptr_eq(&tk, keys))
                && keys.len() < self.config.max_shared_keys
            {
                Plan::Grow(keys.extended(name.clone()))
            } else {
                Plan::Combine
            }),
        });
        let Some(plan) = plan else {
            return Err(Self::no_dict(ty));
        };

        if let Plan::Grow(keys) = &plan {
            self.hub.mutation_observed(ty.id(), &MutationKind::KeysChanged);
            ty.replace_keys(Arc::clone(keys));
            self.bump_tree(std::slice::from_ref(ty));
            tracing::trace!(type_id = ty.id().raw(), keys = keys.len(), "shared keys grown");
        }

        instance.with_dict_mut(|d| {
            let Some(dict) = d.as_mut() else { return };
            let stored = match plan {
                Plan::InPlace => {
                    let index = dict.split_keys().and_then(|k| k.index_of(name));
                    match index {
                        Some(i) => dict.set_split(i, value.clone()),
                        None => dict.set_combined(name.clone(), value.clone()),
                    }
                }
                Plan::Grow(keys) => dict.grow_split(keys, value.clone()),
                Plan::Combine => false,
            };
            if !stored {
                dict.make_combined();
                dict.set_combined(name.clone(), value);
            }
        });
        Ok(())
    }

    /// `instance.__class__ = new_type`.
    pub fn set_class(&self, instance: &InstanceRef, new_type: &TypeRef) -> CinderResult<()> {
        let _guard = self.mutator.lock();
        let old = instance.type_of();
        if !new_type.layout_compatible(&old) {
            return Err(CinderError::type_error(format!(
                "__class__ assignment: '{}' object layout differs from '{}'",
                new_type.name(),
                old.name()
            )));
        }
        let marked: Vec<TypeRef> = instance
            .dict_names()
            .iter()
            .flat_map(|name| shadow::note_instance_write(new_type, name))
            .collect();
        self.bump_tree(&marked);
        instance.set_type(Arc::clone(new_type));
        Ok(())
    }

    // =========================================================================
    // Reference Attribute Paths
    // =========================================================================

    /// Uncached `getattr(instance, name)`.
    pub fn get_attr(&self, instance: &InstanceRef, name: &InternedString) -> CinderResult<Value> {
        let ty = instance.type_of();
        let found = ty.lookup(name).map(|(_, attr)| attr);
        if let Some(attr) = &found {
            if attr.kind().overrides_instance() {
                return attr.load_from_type(instance);
            }
        }
        if let Some(value) = instance.dict_get(name) {
            return Ok(value);
        }
        match found {
            Some(attr) => attr.load_from_type(instance),
            None => Err(CinderError::no_attribute(ty.name(), name)),
        }
    }

    /// Uncached `setattr(instance, name, value)`.
    pub fn set_attr(
        &self,
        instance: &InstanceRef,
        name: &InternedString,
        value: Value,
    ) -> CinderResult<()> {
        let ty = instance.type_of();
        let found = ty.lookup(name).map(|(_, attr)| attr);
        if let Some(attr) = &found {
            match &attr.payload {
                AttrPayload::Descriptor(d) => {
                    if let Some(set) = d.setter() {
                        return set(instance, value);
                    }
                }
                AttrPayload::Slot(offset) => return instance.set_instance_slot(*offset, value),
                AttrPayload::Value(_) => {}
            }
        }
        if instance.has_dict() {
            return self.store_in_dict(instance, &ty, name, value);
        }
        match found {
            Some(_) => Err(CinderError::attribute(format!(
                "'{}' object attribute '{}' is read-only",
                ty.name(),
                name
            ))),
            None => Err(CinderError::no_attribute(ty.name(), name)),
        }
    }

    /// Uncached `delattr(instance, name)`.
    pub fn del_attr(&self, instance: &InstanceRef, name: &InternedString) -> CinderResult<()> {
        let _guard = self.mutator.lock();
        let ty = instance.type_of();
        match ty.lookup(name).map(|(_, attr)| attr.payload) {
            Some(AttrPayload::Descriptor(d)) if d.is_data() => {
                return Err(CinderError::attribute(format!(
                    "property '{}' of '{}' object has no deleter",
                    name,
                    ty.name()
                )));
            }
            Some(AttrPayload::Slot(offset)) => {
                return instance
                    .clear_instance_slot(offset)
                    .map(|_| ())
                    .ok_or_else(|| CinderError::no_attribute(ty.name(), name));
            }
            _ => {}
        }
        instance
            .with_dict_mut(|d| d.as_mut().and_then(|dict| dict.remove(name)))
            .map(|_| ())
            .ok_or_else(|| CinderError::no_attribute(ty.name(), name))
    }

    /// Uncached method load. A plain function found on the type and not
    /// shadowed by the instance dict comes back unbound with its receiver.
    pub fn load_method(
        &self,
        instance: &InstanceRef,
        name: &InternedString,
    ) -> CinderResult<MethodPair> {
        let ty = instance.type_of();
        if let Some((_, attr)) = ty.lookup(name) {
            if let Some(f) = attr.as_function() {
                if !instance.dict_contains(name) {
                    return Ok(MethodPair::unbound(Arc::clone(f), Arc::clone(instance)));
                }
            }
        }
        self.get_attr(instance, name).map(MethodPair::attr)
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// Create a module.
    pub fn new_module(&self, name: &str, watchable: bool) -> ModuleRef {
        let _guard = self.mutator.lock();
        ModuleObject::new(
            intern(name),
            watchable,
            self.draw_version(VersionTag::UNASSIGNED),
        )
    }

    /// `module.name = value`.
    pub fn module_set(&self, module: &ModuleRef, name: &str, value: Value) {
        let _guard = self.mutator.lock();
        module.insert(intern(name), value);
        module.set_version(self.draw_version(module.version()));
    }

    /// `del module.name`.
    pub fn module_del(&self, module: &ModuleRef, name: &str) -> CinderResult<Value> {
        let _guard = self.mutator.lock();
        let name = intern(name);
        let removed = module.get_attr(&name)?;
        module.remove(&name);
        module.set_version(self.draw_version(module.version()));
        Ok(removed)
    }

    /// Uncached `module.name`.
    pub fn module_get_attr(&self, module: &ModuleRef, name: &InternedString) -> CinderResult<Value> {
        module.get_attr(name)
    }

    // =========================================================================
    // Instrumentation
    // =========================================================================

    /// Install a debugger, profiler or trace hook.
    pub fn add_hook(&self, kind: HookKind) -> HookId {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        let first = {
            let mut hooks = self.hooks.lock();
            hooks.insert(id, kind);
            hooks.len() == 1
        };
        if first {
            tracing::debug!(?kind, "instrumentation activated");
            self.hub.instrumentation_state_changed(true);
        }
        id
    }

    /// Remove a hook. Returns false if it was not installed.
    pub fn remove_hook(&self, id: HookId) -> bool {
        let (removed, last) = {
            let mut hooks = self.hooks.lock();
            let removed = hooks.remove(&id).is_some();
            (removed, removed && hooks.is_empty())
        };
        if last {
            tracing::debug!("instrumentation deactivated");
            self.hub.instrumentation_state_changed(false);
        }
        removed
    }

    /// Whether any hook is installed.
    pub fn instrumentation_active(&self) -> bool {
        !self.hooks.lock().is_empty()
    }
}

/// Slot count and dict support instances inherit from `bases`.
fn base_layout(bases: &[TypeRef]) -> (usize, bool) {
    (
        bases.iter().map(|b| b.slot_count()).max().unwrap_or(0),
        bases.iter().any(|b| b.has_dict()),
    )
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("types", &self.types.read().len())
            .field("hooks", &self.hooks.lock().len())
            .field("observers", &self.hub.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
