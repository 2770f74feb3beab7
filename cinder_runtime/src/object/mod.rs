//! Object model: types, instances, descriptors and modules.

pub mod descriptor;
pub mod instance;
pub mod module;
pub mod mro;
pub mod type_obj;

pub use descriptor::{
    AttrDescriptor, AttrKind, AttrPayload, Descriptor, Getter, Setter, getter, setter,
};
pub use instance::{Instance, InstanceRef};
pub use module::{ModuleId, ModuleObject, ModuleRef};
pub use mro::{IdMro, MroError, MroResult, compute_c3_mro};
pub use type_obj::{Mro, MroHook, TypeFlags, TypeId, TypeObject, TypeRef, mro_hook};
