//! Error types and result definitions for Cinder.
//!
//! Every error that can reach user code from the attribute machinery is
//! expressed here. Internal cache failures (megamorphic demotion, watcher
//! refusal) never surface; they are recovered inside the JIT crate and only
//! an `AttributeError` identical to the uncached path's can escape a probe.

use thiserror::Error;

/// The unified result type used throughout Cinder.
pub type CinderResult<T> = Result<T, CinderError>;

/// User-visible error conditions raised by attribute access and type mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CinderError {
    /// Attribute lookup or assignment failed.
    #[error("AttributeError: {message}")]
    AttributeError {
        /// Error description.
        message: String,
    },

    /// Operation not supported for the given type.
    #[error("TypeError: {message}")]
    TypeError {
        /// Error description.
        message: String,
    },

    /// Value error.
    #[error("ValueError: {message}")]
    ValueError {
        /// Error description.
        message: String,
    },

    /// Key not found in a mapping.
    #[error("KeyError: {key}")]
    KeyError {
        /// The missing key representation.
        key: String,
    },

    /// Internal runtime error (should never occur in a correct implementation).
    #[error("InternalError: {message}")]
    InternalError {
        /// Error description.
        message: String,
    },
}

impl CinderError {
    /// Create an attribute error with a free-form message.
    #[must_use]
    pub fn attribute(message: impl Into<String>) -> Self {
        Self::AttributeError {
            message: message.into(),
        }
    }

    /// Create the canonical "object has no attribute" error.
    #[must_use]
    pub fn no_attribute(type_name: &str, attr: &str) -> Self {
        Self::AttributeError {
            message: format!("'{type_name}' object has no attribute '{attr}'"),
        }
    }

    /// Create a type error.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into(),
        }
    }

    /// Create a value error.
    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::ValueError {
            message: message.into(),
        }
    }

    /// Create a key error.
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self::KeyError { key: key.into() }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Check whether this is an attribute error.
    #[inline]
    #[must_use]
    pub fn is_attribute_error(&self) -> bool {
        matches!(self, Self::AttributeError { .. })
    }

    /// Get the Python exception type name.
    #[must_use]
    pub fn exception_type(&self) -> &'static str {
        match self {
            Self::AttributeError { .. } => "AttributeError",
            Self::TypeError { .. } => "TypeError",
            Self::ValueError { .. } => "ValueError",
            Self::KeyError { .. } => "KeyError",
            Self::InternalError { .. } => "SystemError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_error_creation() {
        let err = CinderError::attribute("can't set attribute");

        match &err {
            CinderError::AttributeError { message } => {
                assert_eq!(message, "can't set attribute");
            }
            _ => panic!("Expected AttributeError"),
        }

        assert_eq!(err.exception_type(), "AttributeError");
        assert!(err.is_attribute_error());
    }

    #[test]
    fn test_no_attribute_message() {
        let err = CinderError::no_attribute("Point", "z");
        assert_eq!(
            err.to_string(),
            "AttributeError: 'Point' object has no attribute 'z'"
        );
    }

    #[test]
    fn test_type_error_creation() {
        let err = CinderError::type_error("__class__ assignment: layouts differ");

        assert_eq!(err.exception_type(), "TypeError");
        assert!(!err.is_attribute_error());
        assert!(err.to_string().starts_with("TypeError: "));
    }

    #[test]
    fn test_value_error_creation() {
        let err = CinderError::value_error("bad value");
        assert_eq!(err.exception_type(), "ValueError");
    }

    #[test]
    fn test_key_error_creation() {
        let err = CinderError::key("missing");

        assert_eq!(err.exception_type(), "KeyError");
        assert_eq!(err.to_string(), "KeyError: missing");
    }

    #[test]
    fn test_internal_error_maps_to_system_error() {
        let err = CinderError::internal("unreachable state");
        assert_eq!(err.exception_type(), "SystemError");
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            CinderError::no_attribute("A", "x"),
            CinderError::no_attribute("A", "x")
        );
        assert_ne!(
            CinderError::no_attribute("A", "x"),
            CinderError::no_attribute("A", "y")
        );
    }
}
