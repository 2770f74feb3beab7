//! Instances of user-defined types.
//!
//! An instance has a type reference (swappable through `__class__`
//! assignment), an optional attribute dictionary and a fixed slot region.
//! The accessors here are the raw host services caches build on:
//! `type_of`, `keys_of`, and slot get/set. Writes that can shadow a type
//! attribute go through the runtime, which runs the shadow tracker first.

use super::type_obj::{TypeId, TypeRef};
use crate::types::{InstanceDict, KeysId};
use cinder_core::{BoundMethod, CinderError, CinderResult, FunctionObject, InternedString, ObjectRef, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared reference to an instance.
pub type InstanceRef = Arc<Instance>;

/// An object created from a [`TypeObject`](super::TypeObject).
pub struct Instance {
    ty: RwLock<TypeRef>,
    dict: RwLock<Option<InstanceDict>>,
    slots: RwLock<Vec<Option<Value>>>,
}

impl Instance {
    pub(crate) fn new(ty: TypeRef, dict: Option<InstanceDict>, slot_count: usize) -> InstanceRef {
        Arc::new(Self {
            ty: RwLock::new(ty),
            dict: RwLock::new(dict),
            slots: RwLock::new(vec![None; slot_count]),
        })
    }

    /// `type_of(object)`.
    #[inline]
    pub fn type_of(&self) -> TypeRef {
        self.ty.read().clone()
    }

    /// Id of the current type.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.ty.read().id()
    }

    pub(crate) fn set_type(&self, ty: TypeRef) -> TypeRef {
        std::mem::replace(&mut *self.ty.write(), ty)
    }

    // =========================================================================
    // Dictionary
    // =========================================================================

    /// Whether the instance carries a `__dict__`.
    #[inline]
    pub fn has_dict(&self) -> bool {
        self.dict.read().is_some()
    }

    /// `keys_of(self.__dict__)`, or `None` without a dict.
    #[inline]
    pub fn keys_of(&self) -> Option<KeysId> {
        self.dict.read().as_ref().map(InstanceDict::keys_id)
    }

    /// Read `self.__dict__[name]`.
    #[inline]
    pub fn dict_get(&self, name: &InternedString) -> Option<Value> {
        self.dict.read().as_ref().and_then(|d| d.get(name))
    }

    /// Read split storage by index.
    #[inline]
    pub fn dict_get_split(&self, index: usize) -> Option<Value> {
        self.dict.read().as_ref().and_then(|d| d.get_split(index))
    }

    /// Check for `name` in `self.__dict__`.
    #[inline]
    pub fn dict_contains(&self, name: &InternedString) -> bool {
        self.dict.read().as_ref().is_some_and(|d| d.contains(name))
    }

    /// Names currently present in `self.__dict__`.
    pub fn dict_names(&self) -> Vec<InternedString> {
        self.dict
            .read()
            .as_ref()
            .map(InstanceDict::names)
            .unwrap_or_default()
    }

    /// Whether the dict uses split storage.
    pub fn dict_is_split(&self) -> bool {
        self.dict.read().as_ref().is_some_and(InstanceDict::is_split)
    }

    /// Write split storage at `index` if the dict still has keys `keys`.
    ///
    /// Returns false, leaving the dict untouched, when the keys differ.
    pub fn store_split_if(&self, keys: KeysId, index: usize, value: Value) -> bool {
        match self.dict.write().as_mut() {
            Some(dict) if dict.keys_id() == keys => dict.set_split(index, value),
            _ => false,
        }
    }

    pub(crate) fn with_dict_mut<R>(&self, f: impl FnOnce(&mut Option<InstanceDict>) -> R) -> R {
        f(&mut self.dict.write())
    }

    // =========================================================================
    // Slots
    // =========================================================================

    /// `get_instance_slot(object, offset)`. `None` when unset or out of range.
    #[inline]
    pub fn get_instance_slot(&self, offset: usize) -> Option<Value> {
        self.slots.read().get(offset).cloned().flatten()
    }

    /// `set_instance_slot(object, offset, value)`.
    pub fn set_instance_slot(&self, offset: usize, value: Value) -> CinderResult<()> {
        match self.slots.write().get_mut(offset) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(CinderError::internal(format!(
                "slot offset {offset} outside instance layout"
            ))),
        }
    }

    /// Clear a slot, returning its previous value.
    pub fn clear_instance_slot(&self, offset: usize) -> Option<Value> {
        self.slots.write().get_mut(offset).and_then(Option::take)
    }

    /// Number of slots in the layout.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    pub(crate) fn slot_or_error(&self, offset: usize, name: &InternedString) -> CinderResult<Value> {
        self.get_instance_slot(offset)
            .ok_or_else(|| CinderError::no_attribute(self.type_of().name(), name))
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Type-erased reference to this instance.
    #[inline]
    pub fn as_object(self: &Arc<Self>) -> ObjectRef {
        ObjectRef::new(Arc::clone(self))
    }

    /// Bind `function` to this instance.
    pub fn bind(self: &Arc<Self>, function: &Arc<FunctionObject>) -> Value {
        Value::BoundMethod(Arc::new(BoundMethod {
            function: Arc::clone(function),
            receiver: self.as_object(),
        }))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_of().name())
            .field("dict", &*self.dict.read())
            .field("slots", &self.slot_count())
            .finish()
    }
}
