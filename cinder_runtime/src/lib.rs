//! # Cinder Runtime
//!
//! The host object model the inline caches run against:
//!
//! - **Types**: versioned type objects with C3 MROs, weak subclass lists and
//!   an instance-shadow bit
//! - **Instances**: split or combined `__dict__` plus a fixed slot region
//! - **Modules**: versioned global dictionaries
//! - **Versions**: one tag allocator per runtime with wrap detection
//! - **Observers**: synchronous delivery of every event a cache depends on
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  mutation_observed   ┌──────────────┐
//! │   Runtime    │ ───────────────────▶ │ ObserverHub  │ ──▶ JIT listener
//! │ (mutations)  │  type_destroyed      │              │
//! └──────┬───────┘  instrumentation     └──────────────┘
//!        │ bump
//!        ▼
//! ┌──────────────┐
//! │ VersionAlloc │
//! └──────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod object;
pub mod observer;
pub mod runtime;
pub mod shadow;
pub mod types;
pub mod version;

pub use config::RuntimeConfig;
pub use object::{
    AttrDescriptor, AttrKind, AttrPayload, Descriptor, Getter, Instance, InstanceRef, ModuleId,
    ModuleObject, ModuleRef, MroHook, Setter, TypeFlags, TypeId, TypeObject, TypeRef, getter,
    mro_hook, setter,
};
pub use observer::{
    BulkReason, HookKind, MutationKind, ObserverHub, ObserverId, RecordedEvent,
    RecordingObserver, RuntimeObserver,
};
pub use runtime::{HookId, MethodPair, Runtime, TypeSpec};
pub use types::{InstanceDict, KeysId, KeysObject};
pub use version::{NextVersion, VersionAllocator, VersionTag};
