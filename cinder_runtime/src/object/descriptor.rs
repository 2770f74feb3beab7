//! Attribute descriptors.
//!
//! Every entry in a type's attribute mapping is an [`AttrDescriptor`]. Its
//! [`AttrKind`] drives the lookup order:
//!
//! 1. Data descriptors and slots on the type win over the instance dict.
//! 2. Instance `__dict__` entries.
//! 3. Non-data descriptors (including plain functions, which bind).
//! 4. Plain class values.
//!
//! A [`Descriptor`]'s kind is not fixed: gaining a setter turns it into a
//! data descriptor, which is a mutation of every type hosting it.

use super::instance::InstanceRef;
use cinder_core::{CinderResult, FunctionObject, InternedString, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// `__get__(instance)`.
pub type Getter = Arc<dyn Fn(&InstanceRef) -> CinderResult<Value> + Send + Sync>;

/// `__set__(instance, value)`.
pub type Setter = Arc<dyn Fn(&InstanceRef, Value) -> CinderResult<()> + Send + Sync>;

/// Box a closure as a [`Getter`].
pub fn getter<F>(f: F) -> Getter
where
    F: Fn(&InstanceRef) -> CinderResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as a [`Setter`].
pub fn setter<F>(f: F) -> Setter
where
    F: Fn(&InstanceRef, Value) -> CinderResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// Attribute Kind
// =============================================================================

/// Classification of a type attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttrKind {
    /// Plain class value.
    PlainValue = 0,
    /// Getter and setter; overrides the instance dict.
    DataDescriptor = 1,
    /// Getter only; shadowed by the instance dict.
    NonDataDescriptor = 2,
    /// Fixed offset in the instance layout.
    Slot = 3,
}

impl AttrKind {
    /// Whether the kind takes priority over instance dict entries.
    #[inline]
    pub const fn overrides_instance(self) -> bool {
        matches!(self, Self::DataDescriptor | Self::Slot)
    }
}

// =============================================================================
// Descriptor
// =============================================================================

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// A user-level descriptor object with `__get__` and optionally `__set__`.
pub struct Descriptor {
    id: u64,
    getter: Getter,
    setter: RwLock<Option<Setter>>,
}

impl Descriptor {
    /// Create a non-data descriptor.
    pub fn non_data(getter: Getter) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
            getter,
            setter: RwLock::new(None),
        })
    }

    /// Create a data descriptor.
    pub fn data(getter: Getter, setter: Setter) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
            getter,
            setter: RwLock::new(Some(setter)),
        })
    }

    /// Non-data descriptor returning a constant.
    pub fn constant(value: Value) -> Arc<Self> {
        Self::non_data(getter(move |_| Ok(value.clone())))
    }

    /// Unique descriptor id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The getter.
    #[inline]
    pub fn getter(&self) -> Getter {
        Arc::clone(&self.getter)
    }

    /// The setter, if the descriptor currently has one.
    #[inline]
    pub fn setter(&self) -> Option<Setter> {
        self.setter.read().clone()
    }

    /// Check for a setter.
    #[inline]
    pub fn is_data(&self) -> bool {
        self.setter.read().is_some()
    }

    /// Replace the setter. Only the runtime's mutation primitive calls this,
    /// since the change must be reported to every hosting type.
    pub(crate) fn replace_setter(&self, setter: Option<Setter>) -> Option<Setter> {
        std::mem::replace(&mut *self.setter.write(), setter)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("data", &self.is_data())
            .finish()
    }
}

// =============================================================================
// Attribute Descriptor
// =============================================================================

/// What a type attribute holds.
#[derive(Clone, Debug)]
pub enum AttrPayload {
    /// A value. Functions bind on access and behave as non-data descriptors.
    Value(Value),
    /// A descriptor object.
    Descriptor(Arc<Descriptor>),
    /// A `__slots__` member at a fixed offset.
    Slot(usize),
}

/// An entry in a type's attribute mapping.
#[derive(Clone, Debug)]
pub struct AttrDescriptor {
    /// Attribute name.
    pub name: InternedString,
    /// The stored payload.
    pub payload: AttrPayload,
}

impl AttrDescriptor {
    /// Create a plain value (or function) attribute.
    pub fn value(name: InternedString, value: Value) -> Self {
        Self {
            name,
            payload: AttrPayload::Value(value),
        }
    }

    /// Create a descriptor attribute.
    pub fn descriptor(name: InternedString, descriptor: Arc<Descriptor>) -> Self {
        Self {
            name,
            payload: AttrPayload::Descriptor(descriptor),
        }
    }

    /// Create a slot attribute.
    pub fn slot(name: InternedString, offset: usize) -> Self {
        Self {
            name,
            payload: AttrPayload::Slot(offset),
        }
    }

    /// Current kind. Descriptor kinds are read live.
    pub fn kind(&self) -> AttrKind {
        match &self.payload {
            AttrPayload::Value(Value::Function(_)) => AttrKind::NonDataDescriptor,
            AttrPayload::Value(_) => AttrKind::PlainValue,
            AttrPayload::Descriptor(d) if d.is_data() => AttrKind::DataDescriptor,
            AttrPayload::Descriptor(_) => AttrKind::NonDataDescriptor,
            AttrPayload::Slot(_) => AttrKind::Slot,
        }
    }

    /// The hosted descriptor object, if any.
    pub fn as_descriptor(&self) -> Option<&Arc<Descriptor>> {
        match &self.payload {
            AttrPayload::Descriptor(d) => Some(d),
            _ => None,
        }
    }

    /// The hosted function, if the attribute is a plain function.
    pub fn as_function(&self) -> Option<&Arc<FunctionObject>> {
        match &self.payload {
            AttrPayload::Value(Value::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Load the attribute for `instance` without consulting its dict.
    pub fn load_from_type(&self, instance: &InstanceRef) -> CinderResult<Value> {
        match &self.payload {
            AttrPayload::Value(Value::Function(f)) => Ok(instance.bind(f)),
            AttrPayload::Value(v) => Ok(v.clone()),
            AttrPayload::Descriptor(d) => (d.getter)(instance),
            AttrPayload::Slot(offset) => instance.slot_or_error(*offset, &self.name),
        }
    }
}
