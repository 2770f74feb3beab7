//! Storage types used by instances.

pub mod dict;

pub use dict::{InstanceDict, KeysId, KeysObject};
