//! Type-version registry.
//!
//! Every mutable type and every module dictionary carries a version tag drawn
//! from one allocator per runtime. A mutation replaces the tag with a fresh
//! one; caches compare tags for equality only, so the counter is free to wrap
//! as long as everything cached before the wrap is thrown away first.
//!
//! # Overflow
//!
//! ```text
//! next() ─▶ 1, 2, ..., max ─▶ wrapped ─▶ 1, 2, ...
//!                                │
//!                                └── caller broadcasts a bulk invalidation
//! ```
//!
//! A tag only identifies a version together with its epoch, the number of
//! wraps before it was drawn. An object that kept a tag across a wrap can
//! draw the same tag again within the next epoch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Version Tag
// =============================================================================

/// A version stamp for a type or module dictionary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct VersionTag(u64);

impl VersionTag {
    /// Tag never handed out by an allocator.
    pub const UNASSIGNED: Self = Self(0);

    /// Create a tag from a raw value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// Allocation Result
// =============================================================================

/// Outcome of drawing a new tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextVersion {
    /// The fresh tag.
    pub tag: VersionTag,
    /// True when the counter passed its ceiling and restarted.
    pub wrapped: bool,
    /// Wraps before this tag was drawn.
    pub epoch: u64,
}

// =============================================================================
// Version Allocator
// =============================================================================

/// Monotonic source of version tags with a configurable ceiling.
#[derive(Debug)]
pub struct VersionAllocator {
    next: AtomicU64,
    max: u64,
    wraps: AtomicU64,
}

impl VersionAllocator {
    /// Smallest usable ceiling. A change must always find a tag different
    /// from the current one.
    pub const MIN_MAX: u64 = 2;

    /// Create an allocator whose tags never exceed `max`.
    #[must_use]
    pub fn new(max: u64) -> Self {
        Self {
            next: AtomicU64::new(1),
            max: max.clamp(Self::MIN_MAX, u64::MAX - 1),
            wraps: AtomicU64::new(0),
        }
    }

    /// Draw the next tag.
    ///
    /// The reported epoch is exact as long as draws are serialised, which
    /// the runtime's mutator lock guarantees.
    pub fn next(&self) -> NextVersion {
        let mut current = self.next.load(Ordering::Acquire);
        loop {
            let (tag, following, wrapped) = if current > self.max {
                (1, 2, true)
            } else {
                (current, current + 1, false)
            };
            match self.next.compare_exchange_weak(
                current,
                following,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let epoch = if wrapped {
                        self.wraps.fetch_add(1, Ordering::AcqRel) + 1
                    } else {
                        self.wraps.load(Ordering::Acquire)
                    };
                    return NextVersion {
                        tag: VersionTag(tag),
                        wrapped,
                        epoch,
                    };
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Peek at the tag the next call would hand out, ignoring wrap-around.
    #[inline]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Configured ceiling.
    #[inline]
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Number of times the counter has wrapped.
    #[inline]
    pub fn wrap_count(&self) -> u64 {
        self.wraps.load(Ordering::Acquire)
    }
}

impl Default for VersionAllocator {
    fn default() -> Self {
        Self::new(u64::MAX - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_strictly_increasing() {
        let alloc = VersionAllocator::default();
        let a = alloc.next();
        let b = alloc.next();
        assert!(!a.wrapped && !b.wrapped);
        assert_eq!(a.tag.raw() + 1, b.tag.raw());
        assert_ne!(a.tag, VersionTag::UNASSIGNED);
    }

    #[test]
    fn test_wrap_reports_once() {
        let alloc = VersionAllocator::new(3);
        let tags: Vec<_> = (0..5).map(|_| alloc.next()).collect();
        assert_eq!(
            tags.iter().map(|n| n.tag.raw()).collect::<Vec<_>>(),
            vec![1, 2, 3, 1, 2]
        );
        assert_eq!(tags.iter().filter(|n| n.wrapped).count(), 1);
        assert!(tags[3].wrapped);
        assert_eq!(alloc.wrap_count(), 1);
        assert_eq!(
            tags.iter().map(|n| n.epoch).collect::<Vec<_>>(),
            vec![0, 0, 0, 1, 1]
        );
    }

    #[test]
    fn test_recycled_tag_has_new_epoch() {
        let alloc = VersionAllocator::new(3);
        let first = alloc.next();
        let again = (0..3).map(|_| alloc.next()).last().unwrap();
        assert_eq!(first.tag, again.tag);
        assert_ne!(first.epoch, again.epoch);
    }

    #[test]
    fn test_small_ceilings_are_clamped() {
        for max in [0, 1] {
            let alloc = VersionAllocator::new(max);
            assert_eq!(alloc.max(), VersionAllocator::MIN_MAX);
            // Two distinct tags exist, so a replacement tag always exists.
            let tags: Vec<u64> = (0..4).map(|_| alloc.next().tag.raw()).collect();
            assert_eq!(tags, vec![1, 2, 1, 2]);
        }
        assert_eq!(VersionAllocator::new(u64::MAX).max(), u64::MAX - 1);
    }

    #[test]
    fn test_concurrent_draws_are_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(VersionAllocator::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let a = Arc::clone(&alloc);
                thread::spawn(move || (0..250).map(|_| a.next().tag).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for tag in h.join().unwrap() {
                assert!(seen.insert(tag));
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
