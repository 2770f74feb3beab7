//! Internal inline-cache errors.
//!
//! These never reach user code. Everything except `AttributeNotFound` is
//! recovered at the site (the entry is not installed, or the site stops
//! caching); `AttributeNotFound` becomes the same `AttributeError` the
//! uncached path raises.
//!
//! A probe never races a type's destruction: the receiver holds its type
//! and a resolution holds every type it depends on until the watch is
//! registered. Destruction only ever reaches installed entries, through
//! the watcher graph.

use cinder_core::CinderError;
use cinder_runtime::TypeId;
use thiserror::Error;

/// Cache-engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IcError {
    /// Resolution found nothing.
    #[error("'{type_name}' object has no attribute '{name}'")]
    AttributeNotFound {
        /// Receiver type name.
        type_name: String,
        /// Attribute name.
        name: String,
    },

    /// A dependency's version moved while the entry was being installed.
    #[error("a dependency of type {0:?} changed during installation")]
    DependencyMoved(TypeId),

    /// The site stopped caching.
    #[error("cache site is megamorphic")]
    SiteMegamorphic,

    /// A type in the resolution path refuses to be watched.
    #[error("type '{type_name}' cannot be watched")]
    WatcherUnavailable {
        /// Name of the refusing type.
        type_name: String,
    },
}

impl IcError {
    /// Whether the error is surfaced to user code.
    #[inline]
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::AttributeNotFound { .. })
    }

    /// The user-visible error, if any.
    pub fn into_user_error(self) -> Option<CinderError> {
        match self {
            Self::AttributeNotFound { type_name, name } => {
                Some(CinderError::no_attribute(&type_name, &name))
            }
            _ => None,
        }
    }
}

impl From<IcError> for CinderError {
    fn from(err: IcError) -> Self {
        let message = err.to_string();
        err.into_user_error()
            .unwrap_or_else(|| CinderError::internal(message))
    }
}

/// Result alias for cache internals.
pub type IcResult<T> = Result<T, IcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_found_is_visible() {
        let err = IcError::AttributeNotFound {
            type_name: "A".into(),
            name: "x".into(),
        };
        assert!(err.is_user_visible());
        assert_eq!(
            err.into_user_error(),
            Some(CinderError::no_attribute("A", "x"))
        );

        for err in [
            IcError::DependencyMoved(TypeId::from_raw(3)),
            IcError::SiteMegamorphic,
            IcError::WatcherUnavailable {
                type_name: "A".into(),
            },
        ] {
            assert!(!err.is_user_visible());
            assert!(err.clone().into_user_error().is_none());
            assert_eq!(CinderError::from(err).exception_type(), "SystemError");
        }
    }
}
