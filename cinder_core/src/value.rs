//! Runtime values.
//!
//! `Value` is the currency passed through attribute caches: classvars,
//! instance-dict entries, slot contents and descriptor results. Heap objects
//! owned by the runtime crate travel as type-erased [`ObjectRef`]s and are
//! compared by identity.

use crate::intern::InternedString;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Object References
// =============================================================================

/// Type-erased, identity-compared reference to a heap object.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    /// Wrap a shared object.
    #[inline]
    pub fn new<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self(object)
    }

    /// Recover the concrete object, if it has type `T`.
    #[inline]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Identity comparison.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Address of the referent, for debugging.
    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<object at {:#x}>", self.addr())
    }
}

// =============================================================================
// Functions
// =============================================================================

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// A callable stored on a type. Binding it to a receiver yields a
/// [`BoundMethod`]; the method cache can skip that allocation.
#[derive(Debug)]
pub struct FunctionObject {
    id: u64,
    name: InternedString,
}

impl FunctionObject {
    /// Create a function with a fresh identity.
    pub fn new(name: InternedString) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
            name,
        })
    }

    /// Unique function id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Function name.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }
}

/// A function bound to its receiver.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    /// The underlying function.
    pub function: Arc<FunctionObject>,
    /// The receiver passed as `self`.
    pub receiver: ObjectRef,
}

// =============================================================================
// Value
// =============================================================================

/// A dynamically-typed runtime value.
#[derive(Clone, Default)]
pub enum Value {
    /// `None`.
    #[default]
    None,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Str(Arc<str>),
    /// Unbound function.
    Function(Arc<FunctionObject>),
    /// Function bound to a receiver.
    BoundMethod(Arc<BoundMethod>),
    /// Any other heap object.
    Object(ObjectRef),
}

impl Value {
    /// Create a `None` value.
    #[inline]
    pub const fn none() -> Self {
        Self::None
    }

    /// Create an integer value.
    #[inline]
    pub const fn int(i: i64) -> Self {
        Self::Int(i)
    }

    /// Create a string value.
    #[inline]
    pub fn str(s: &str) -> Self {
        Self::Str(s.into())
    }

    /// Check for `None`.
    #[inline]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Integer payload, if any.
    #[inline]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String payload, if any.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object payload, if any.
    #[inline]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Function(_) => "function",
            Self::BoundMethod(_) => "method",
            Self::Object(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::BoundMethod(a), Self::BoundMethod(b)) => {
                Arc::ptr_eq(&a.function, &b.function) && a.receiver.ptr_eq(&b.receiver)
            }
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Function(func) => write!(f, "<function {}>", func.name()),
            Self::BoundMethod(m) => {
                write!(f, "<bound method {} of {:?}>", m.function.name(), m.receiver)
            }
            Self::Object(o) => write!(f, "{o:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}
