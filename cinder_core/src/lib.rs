//! # Cinder Core
//!
//! Primitives shared by the Cinder host-runtime model and the JIT inline
//! caches:
//!
//! - **Values**: the dynamically-typed `Value` carried through caches
//! - **Interning**: attribute names compared by pointer
//! - **Errors**: the user-visible error type and result alias

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod intern;
pub mod value;

pub use error::{CinderError, CinderResult};
pub use intern::{InternedString, StringInterner, intern};
pub use value::{BoundMethod, FunctionObject, ObjectRef, Value};

/// Cinder core version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
