//! Attribute resolution oracle.
//!
//! Turns `(receiver type, name)` into a plan a cache entry can replay, plus
//! the list of types whose mutation could change that plan. Resolution is
//! pure: it reads the object model and the shadow bit, nothing else.
//!
//! Load priority:
//!
//! 1. Data descriptor or slot on the type
//! 2. Instance dict, only when the receiver type may shadow
//! 3. Non-data descriptor or function on the type
//! 4. Plain class value
//! 5. Not found

use crate::error::IcError;
use cinder_core::{CinderError, CinderResult, FunctionObject, InternedString, Value};
use cinder_runtime::{
    AttrDescriptor, AttrKind, AttrPayload, Getter, InstanceRef, KeysId, MethodPair, ModuleRef,
    Runtime, Setter, TypeRef,
};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Types an entry must watch.
pub type Dependencies = SmallVec<[TypeRef; 8]>;

// =============================================================================
// Resolved Attribute
// =============================================================================

/// Whether the instance dict can hide the type's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The instance dict must be consulted first.
    ShadowedByInstance,
    /// The type's answer stands.
    VisibleOnType,
    /// Nothing on the type and no dict to look in.
    NotFound,
}

/// Result of walking the receiver type's MRO for one name.
#[derive(Debug, Clone)]
pub struct ResolvedAttr {
    /// MRO entry hosting the attribute.
    pub source_type: Option<TypeRef>,
    /// The hosted attribute.
    pub descriptor: Option<AttrDescriptor>,
    /// Instance visibility.
    pub visibility: Visibility,
    /// Receiver type plus every MRO type up to and including the host; the
    /// whole MRO when nothing was found.
    pub dependencies: Dependencies,
}

/// Walk `ty`'s MRO for `name`.
pub fn resolve_attr(ty: &TypeRef, name: &InternedString) -> ResolvedAttr {
    let mut dependencies: Dependencies = SmallVec::new();
    dependencies.push(Arc::clone(ty));

    let mut found = None;
    for t in ty.mro() {
        if !dependencies.iter().any(|d| d.id() == t.id()) {
            dependencies.push(Arc::clone(&t));
        }
        if let Some(attr) = t.own_attr(name) {
            found = Some((t, attr));
            break;
        }
    }

    let visibility = match &found {
        Some((_, attr)) if attr.kind().overrides_instance() => Visibility::VisibleOnType,
        _ if ty.has_dict() && ty.may_shadow() => Visibility::ShadowedByInstance,
        Some(_) => Visibility::VisibleOnType,
        None if ty.has_dict() => Visibility::ShadowedByInstance,
        None => Visibility::NotFound,
    };

    let (source_type, descriptor) = found.unzip();
    ResolvedAttr {
        source_type,
        descriptor,
        visibility,
        dependencies,
    }
}

/// A plan together with what guards it.
#[derive(Debug, Clone)]
pub struct Resolution<P> {
    /// The action to replay.
    pub plan: P,
    /// Receiver dict keys the plan depends on.
    pub guard_keys: Option<KeysId>,
    /// Types to watch.
    pub dependencies: Dependencies,
}

// =============================================================================
// Plan Building Blocks
// =============================================================================

/// An attribute answered by the type.
#[derive(Clone)]
pub enum TypeAttr {
    /// Plain class value.
    Value(Value),
    /// Function, bound to the receiver on load.
    Method(Arc<FunctionObject>),
    /// Non-data descriptor.
    Getter(Getter),
}

impl TypeAttr {
    /// Shape of a non-overriding type attribute. `None` for slots and data
    /// descriptors.
    fn of(attr: &AttrDescriptor) -> Option<Self> {
        match &attr.payload {
            AttrPayload::Value(Value::Function(f)) => Some(Self::Method(Arc::clone(f))),
            AttrPayload::Value(v) => Some(Self::Value(v.clone())),
            AttrPayload::Descriptor(d) if !d.is_data() => Some(Self::Getter(d.getter())),
            _ => None,
        }
    }

    /// Load for `instance`.
    #[inline]
    pub fn load(&self, instance: &InstanceRef) -> CinderResult<Value> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Method(f) => Ok(instance.bind(f)),
            Self::Getter(get) => get(instance),
        }
    }
}

impl fmt::Debug for TypeAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Method(func) => f.debug_tuple("Method").field(func.name()).finish(),
            Self::Getter(_) => f.write_str("Getter"),
        }
    }
}

/// How to read the receiver's dict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictProbe {
    /// Split storage with known keys: read `index` directly, or skip the
    /// dict when the keys do not contain the name.
    Split {
        /// Keys the index was computed against.
        keys: KeysId,
        /// Position of the name, if present.
        index: Option<usize>,
    },
    /// Hash lookup by name.
    ByName,
}

impl DictProbe {
    /// Probe for the name's receiver dict, falling back to a name lookup if
    /// the dict moved off the recorded keys.
    fn for_receiver(ty: &TypeRef, keys: Option<KeysId>, name: &InternedString) -> Self {
        match (keys, ty.keys_object()) {
            (Some(k), Some(type_keys)) if type_keys.id() == k => Self::Split {
                keys: k,
                index: type_keys.index_of(name),
            },
            _ => Self::ByName,
        }
    }

    /// Receiver keys this probe relies on.
    #[inline]
    fn guard_keys(&self) -> Option<KeysId> {
        match self {
            Self::Split { keys, .. } => Some(*keys),
            Self::ByName => None,
        }
    }

    #[inline]
    fn read(&self, instance: &InstanceRef, name: &InternedString) -> Option<Value> {
        match *self {
            Self::Split { keys, index } if instance.keys_of() == Some(keys) => {
                index.and_then(|i| instance.dict_get_split(i))
            }
            _ => instance.dict_get(name),
        }
    }
}

fn not_found(instance: &InstanceRef, name: &InternedString) -> CinderError {
    IcError::AttributeNotFound {
        type_name: instance.type_of().name().to_string(),
        name: name.to_string(),
    }
    .into()
}

// =============================================================================
// Load Plans
// =============================================================================

/// Replayable attribute load.
#[derive(Clone)]
pub enum LoadPlan {
    /// Call the data descriptor's getter.
    DataDescriptor(Getter),
    /// Read a `__slots__` member.
    Slot {
        /// Offset in the instance layout.
        offset: usize,
    },
    /// Read the instance dict, then fall back to the type.
    Dict {
        /// Dict access path.
        probe: DictProbe,
        /// Type answer when the dict lacks the name.
        fallback: Option<TypeAttr>,
    },
    /// Answer from the type without touching the dict.
    Type(TypeAttr),
    /// Raise `AttributeError`.
    NotFound,
}

impl LoadPlan {
    /// Execute for `instance`.
    pub fn execute(&self, instance: &InstanceRef, name: &InternedString) -> CinderResult<Value> {
        match self {
            Self::DataDescriptor(get) => get(instance),
            Self::Slot { offset } => instance
                .get_instance_slot(*offset)
                .ok_or_else(|| not_found(instance, name)),
            Self::Dict { probe, fallback } => match probe.read(instance, name) {
                Some(value) => Ok(value),
                None => match fallback {
                    Some(attr) => attr.load(instance),
                    None => Err(not_found(instance, name)),
                },
            },
            Self::Type(attr) => {
                // Every path that can put a type-defined name into an
                // instance dict sets the shadow bit first.
                debug_assert!(
                    !instance.dict_contains(name),
                    "instance dict shadows '{name}' while the shadow bit is clear"
                );
                attr.load(instance)
            }
            Self::NotFound => Err(not_found(instance, name)),
        }
    }
}

impl fmt::Debug for LoadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataDescriptor(_) => f.write_str("DataDescriptor"),
            Self::Slot { offset } => f.debug_struct("Slot").field("offset", offset).finish(),
            Self::Dict { probe, fallback } => f
                .debug_struct("Dict")
                .field("probe", probe)
                .field("fallback", fallback)
                .finish(),
            Self::Type(attr) => f.debug_tuple("Type").field(attr).finish(),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

fn load_plan(
    ty: &TypeRef,
    keys: Option<KeysId>,
    name: &InternedString,
    resolved: &ResolvedAttr,
) -> (LoadPlan, Option<KeysId>) {
    let attr = resolved.descriptor.as_ref();
    match (attr.map(AttrDescriptor::kind), resolved.visibility) {
        (Some(AttrKind::DataDescriptor), _) => {
            let getter = attr
                .and_then(AttrDescriptor::as_descriptor)
                .map(|d| d.getter());
            match getter {
                Some(get) => (LoadPlan::DataDescriptor(get), None),
                None => (LoadPlan::NotFound, None),
            }
        }
        (Some(AttrKind::Slot), _) => match attr.map(|a| &a.payload) {
            Some(AttrPayload::Slot(offset)) => (LoadPlan::Slot { offset: *offset }, None),
            _ => (LoadPlan::NotFound, None),
        },
        (_, Visibility::ShadowedByInstance) => {
            let probe = DictProbe::for_receiver(ty, keys, name);
            let fallback = attr.and_then(TypeAttr::of);
            (LoadPlan::Dict { probe, fallback }, probe.guard_keys())
        }
        (Some(_), Visibility::VisibleOnType) => match attr.and_then(TypeAttr::of) {
            Some(t) => (LoadPlan::Type(t), None),
            None => (LoadPlan::NotFound, None),
        },
        _ => (LoadPlan::NotFound, None),
    }
}

/// `resolve_load(receiver_type, name)`. `keys` is the receiver dict's keys
/// identity, used to precompute a split index.
pub fn resolve_load(
    ty: &TypeRef,
    keys: Option<KeysId>,
    name: &InternedString,
) -> Resolution<LoadPlan> {
    let resolved = resolve_attr(ty, name);
    let (plan, guard_keys) = load_plan(ty, keys, name, &resolved);
    Resolution {
        plan,
        guard_keys,
        dependencies: resolved.dependencies,
    }
}

// =============================================================================
// Store Plans
// =============================================================================

/// Replayable attribute store.
#[derive(Clone)]
pub enum StorePlan {
    /// Call the data descriptor's setter.
    DataDescriptor(Setter),
    /// Write a `__slots__` member.
    Slot {
        /// Offset in the instance layout.
        offset: usize,
    },
    /// Write split storage directly. Only planned for names the type's
    /// instances already stored, so the shadow tracker has nothing to do.
    SplitDict {
        /// Keys the index belongs to.
        keys: KeysId,
        /// Position of the name.
        index: usize,
    },
    /// Generic dict store through the runtime.
    Dict,
    /// The type defines the name and instances have no dict.
    ReadOnly,
    /// Nothing to store into.
    NoAttribute,
}

impl StorePlan {
    /// Execute for `instance`.
    pub fn execute(
        &self,
        runtime: &Runtime,
        instance: &InstanceRef,
        name: &InternedString,
        value: Value,
    ) -> CinderResult<()> {
        match self {
            Self::DataDescriptor(set) => set(instance, value),
            Self::Slot { offset } => instance.set_instance_slot(*offset, value),
            Self::SplitDict { keys, index } => {
                if instance.store_split_if(*keys, *index, value.clone()) {
                    Ok(())
                } else {
                    runtime.instance_dict_set(instance, name, value)
                }
            }
            Self::Dict => runtime.instance_dict_set(instance, name, value),
            Self::ReadOnly => Err(CinderError::attribute(format!(
                "'{}' object attribute '{}' is read-only",
                instance.type_of().name(),
                name
            ))),
            Self::NoAttribute => Err(not_found(instance, name)),
        }
    }
}

impl fmt::Debug for StorePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataDescriptor(_) => f.write_str("DataDescriptor"),
            Self::Slot { offset } => f.debug_struct("Slot").field("offset", offset).finish(),
            Self::SplitDict { keys, index } => f
                .debug_struct("SplitDict")
                .field("keys", keys)
                .field("index", index)
                .finish(),
            Self::Dict => f.write_str("Dict"),
            Self::ReadOnly => f.write_str("ReadOnly"),
            Self::NoAttribute => f.write_str("NoAttribute"),
        }
    }
}

/// `resolve_store(receiver_type, name)`.
pub fn resolve_store(
    ty: &TypeRef,
    keys: Option<KeysId>,
    name: &InternedString,
) -> Resolution<StorePlan> {
    let resolved = resolve_attr(ty, name);
    let attr = resolved.descriptor.as_ref();

    let setter = attr
        .and_then(AttrDescriptor::as_descriptor)
        .and_then(|d| d.setter());
    let slot = match attr.map(|a| &a.payload) {
        Some(AttrPayload::Slot(offset)) => Some(*offset),
        _ => None,
    };

    let (plan, guard_keys) = if let Some(set) = setter {
        (StorePlan::DataDescriptor(set), None)
    } else if let Some(offset) = slot {
        (StorePlan::Slot { offset }, None)
    } else if ty.has_dict() {
        match DictProbe::for_receiver(ty, keys, name) {
            DictProbe::Split {
                keys,
                index: Some(index),
            } if ty.instance_ever_stored(name) => (StorePlan::SplitDict { keys, index }, Some(keys)),
            _ => (StorePlan::Dict, None),
        }
    } else if attr.is_some() {
        (StorePlan::ReadOnly, None)
    } else {
        (StorePlan::NoAttribute, None)
    };

    Resolution {
        plan,
        guard_keys,
        dependencies: resolved.dependencies,
    }
}

// =============================================================================
// Method Plans
// =============================================================================

/// Replayable method load.
#[derive(Clone)]
pub enum MethodPlan {
    /// Function on the type that no instance can shadow: push it unbound
    /// with the receiver.
    Method(Arc<FunctionObject>),
    /// Function on the type, but the dict may hold the name.
    DictOrMethod {
        /// Dict access path.
        probe: DictProbe,
        /// Function used when the dict lacks the name.
        function: Arc<FunctionObject>,
    },
    /// Ordinary attribute load.
    Attr(LoadPlan),
}

impl MethodPlan {
    /// Execute for `instance`.
    pub fn execute(
        &self,
        instance: &InstanceRef,
        name: &InternedString,
    ) -> CinderResult<MethodPair> {
        match self {
            Self::Method(f) => {
                debug_assert!(
                    !instance.dict_contains(name),
                    "instance dict shadows method '{name}' while the shadow bit is clear"
                );
                Ok(MethodPair::unbound(Arc::clone(f), Arc::clone(instance)))
            }
            Self::DictOrMethod { probe, function } => Ok(match probe.read(instance, name) {
                Some(value) => MethodPair::attr(value),
                None => MethodPair::unbound(Arc::clone(function), Arc::clone(instance)),
            }),
            Self::Attr(plan) => plan.execute(instance, name).map(MethodPair::attr),
        }
    }
}

impl fmt::Debug for MethodPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(func) => f.debug_tuple("Method").field(func.name()).finish(),
            Self::DictOrMethod { probe, function } => f
                .debug_struct("DictOrMethod")
                .field("probe", probe)
                .field("function", function.name())
                .finish(),
            Self::Attr(plan) => f.debug_tuple("Attr").field(plan).finish(),
        }
    }
}

/// `resolve_method(receiver_type, name)`.
pub fn resolve_method(
    ty: &TypeRef,
    keys: Option<KeysId>,
    name: &InternedString,
) -> Resolution<MethodPlan> {
    let resolved = resolve_attr(ty, name);
    let function = resolved
        .descriptor
        .as_ref()
        .and_then(AttrDescriptor::as_function)
        .cloned();

    let (plan, guard_keys) = match function {
        Some(f) if resolved.visibility == Visibility::VisibleOnType => (MethodPlan::Method(f), None),
        Some(function) => {
            let probe = DictProbe::for_receiver(ty, keys, name);
            (MethodPlan::DictOrMethod { probe, function }, probe.guard_keys())
        }
        None => {
            let (plan, guard_keys) = load_plan(ty, keys, name, &resolved);
            (MethodPlan::Attr(plan), guard_keys)
        }
    };

    Resolution {
        plan,
        guard_keys,
        dependencies: resolved.dependencies,
    }
}

// =============================================================================
// Module Plans
// =============================================================================

/// Replayable module global load.
#[derive(Debug, Clone)]
pub enum ModulePlan {
    /// The global's value at the guarded version; `None` raises.
    Cached(Option<Value>),
    /// The module refuses watching; always read through.
    Uncacheable,
}

impl ModulePlan {
    /// Execute against `module`.
    pub fn execute(&self, module: &ModuleRef, name: &InternedString) -> CinderResult<Value> {
        match self {
            Self::Cached(Some(value)) => Ok(value.clone()),
            Self::Cached(None) | Self::Uncacheable => module.get_attr(name),
        }
    }

    /// Whether the plan may be installed.
    #[inline]
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// `resolve_module_attr(module, name)`.
pub fn resolve_module_attr(module: &ModuleRef, name: &InternedString) -> ModulePlan {
    if module.is_watchable() {
        ModulePlan::Cached(module.get(name))
    } else {
        ModulePlan::Uncacheable
    }
}

// =============================================================================
// Tests
// =============================================================================
