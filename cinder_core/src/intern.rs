//! String interning for attribute names.
//!
//! Attribute names are compared on every cache probe, so they are interned
//! once and compared by pointer afterwards. Two `InternedString`s are equal
//! if and only if they were produced by the same interner for the same text.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A handle to an interned string.
#[derive(Clone)]
pub struct InternedString {
    inner: Arc<str>,
}

impl InternedString {
    #[inline]
    fn new(s: Arc<str>) -> Self {
        Self { inner: s }
    }

    /// Get the string content.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Get the length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the string is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    fn ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }
}

impl PartialEq for InternedString {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for InternedString {}

impl Hash for InternedString {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with pointer equality.
        self.ptr().hash(state);
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for InternedString {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::ops::Deref for InternedString {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl PartialEq<str> for InternedString {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for InternedString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Thread-safe string interner.
pub struct StringInterner {
    by_value: RwLock<FxHashMap<Arc<str>, InternedString>>,
}

impl StringInterner {
    /// Create a new, empty string interner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_value: RwLock::new(FxHashMap::default()),
        }
    }

    /// Intern a string, returning a handle.
    ///
    /// Interning the same text twice returns handles that compare equal.
    pub fn intern(&self, s: &str) -> InternedString {
        if let Some(interned) = self.by_value.read().get(s) {
            return interned.clone();
        }

        let mut map = self.by_value.write();
        // Another thread may have won the race between the two locks.
        if let Some(interned) = map.get(s) {
            return interned.clone();
        }

        let arc: Arc<str> = s.into();
        let interned = InternedString::new(arc.clone());
        map.insert(arc, interned.clone());
        interned
    }

    /// Get an already-interned string without creating a new one.
    #[must_use]
    pub fn get(&self, s: &str) -> Option<InternedString> {
        self.by_value.read().get(s).cloned()
    }

    /// Check if a string has been interned.
    #[must_use]
    pub fn contains(&self, s: &str) -> bool {
        self.by_value.read().contains_key(s)
    }

    /// Get the number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_value.read().len()
    }

    /// Check if the interner is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_value.read().is_empty()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringInterner")
            .field("count", &self.len())
            .finish()
    }
}

/// Process-wide interner for attribute and type names.
pub static GLOBAL_INTERNER: std::sync::LazyLock<StringInterner> =
    std::sync::LazyLock::new(StringInterner::new);

/// Intern a string using the global interner.
#[inline]
pub fn intern(s: &str) -> InternedString {
    GLOBAL_INTERNER.intern(s)
}
