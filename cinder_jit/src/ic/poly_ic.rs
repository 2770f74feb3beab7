//! Polymorphic Inline Cache
//!
//! A small fixed-capacity table of cache entries for one site. Lookup is a
//! linear scan, optimal for the handful of receiver types a polymorphic site
//! sees.
//!
//! # Replacement
//!
//! When the table is full the least recently used entry is evicted. A site
//! that keeps evicting is megamorphic: once `eviction_limit` evictions land
//! within `eviction_window` probes, the table is cleared and refuses every
//! further insert.

use smallvec::SmallVec;

use super::POLY_IC_ENTRIES;

// =============================================================================
// Poly IC Entry
// =============================================================================

/// A single entry with its recency stamp.
#[derive(Debug)]
pub struct PolyIcEntry<E> {
    /// The cached value.
    pub value: E,
    /// Probe tick of the last hit or of installation.
    last_used: u64,
}

impl<E> PolyIcEntry<E> {
    /// Create an entry stamped at `tick`.
    #[inline]
    pub fn new(value: E, tick: u64) -> Self {
        Self {
            value,
            last_used: tick,
        }
    }

    /// Mark the entry used at `tick`.
    #[inline]
    pub fn touch(&mut self, tick: u64) {
        self.last_used = tick;
    }

    /// Tick of the last use.
    #[inline]
    pub fn last_used(&self) -> u64 {
        self.last_used
    }
}

// =============================================================================
// Insert Outcome
// =============================================================================

/// What an insert did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored in a free slot.
    Inserted,
    /// Stored after evicting the least recently used entry.
    Evicted,
    /// Not stored; the table is megamorphic.
    Megamorphic,
}

// =============================================================================
// Poly IC
// =============================================================================

/// Polymorphic cache table.
#[derive(Debug)]
pub struct PolyIc<E> {
    entries: SmallVec<[PolyIcEntry<E>; POLY_IC_ENTRIES]>,
    capacity: usize,
    clock: u64,
    eviction_limit: u32,
    eviction_window: u64,
    window_start: u64,
    window_evictions: u32,
    megamorphic: bool,
}

impl<E> PolyIc<E> {
    /// Create an empty table.
    pub fn new(capacity: usize, eviction_limit: u32, eviction_window: u64) -> Self {
        Self {
            entries: SmallVec::new(),
            capacity: capacity.max(1),
            clock: 0,
            eviction_limit: eviction_limit.max(1),
            eviction_window: eviction_window.max(1),
            window_start: 0,
            window_evictions: 0,
            megamorphic: false,
        }
    }

    /// Advance the probe clock.
    #[inline]
    pub fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Find the first entry satisfying `pred`, marking it used.
    #[inline]
    pub fn find(&mut self, mut pred: impl FnMut(&E) -> bool) -> Option<&E> {
        let now = self.clock;
        let entry = self.entries.iter_mut().find(|e| pred(&e.value))?;
        entry.touch(now);
        Some(&entry.value)
    }

    /// Insert `value`, evicting the least recently used entry when full.
    pub fn insert(&mut self, value: E) -> InsertOutcome {
        if self.megamorphic {
            return InsertOutcome::Megamorphic;
        }
        let now = self.clock;
        if self.entries.len() < self.capacity {
            self.entries.push(PolyIcEntry::new(value, now));
            return InsertOutcome::Inserted;
        }

        if now.saturating_sub(self.window_start) > self.eviction_window {
            self.window_start = now;
            self.window_evictions = 0;
        }
        self.window_evictions += 1;
        if self.window_evictions >= self.eviction_limit {
            self.megamorphic = true;
            self.entries.clear();
            return InsertOutcome::Megamorphic;
        }

        self.replace_lru(value);
        InsertOutcome::Evicted
    }

    /// Replace the least recently used entry.
    fn replace_lru(&mut self, value: E) {
        let now = self.clock;
        let lru = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_used())
            .map(|(i, _)| i);
        match lru {
            Some(i) => self.entries[i] = PolyIcEntry::new(value, now),
            None => self.entries.push(PolyIcEntry::new(value, now)),
        }
    }

    /// Keep only entries satisfying `keep`. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&E) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| keep(&e.value));
        before - self.entries.len()
    }

    /// Drop every entry and leave the megamorphic state.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.window_start = self.clock;
        self.window_evictions = 0;
        self.megamorphic = false;
    }

    /// Check if the table stopped caching.
    #[inline]
    pub fn is_megamorphic(&self) -> bool {
        self.megamorphic
    }

    /// Check if the table is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Get number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.iter().map(|e| &e.value)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_until_full() {
        let mut ic = PolyIc::new(2, 8, 100);
        assert_eq!(ic.insert(1u32), InsertOutcome::Inserted);
        assert_eq!(ic.insert(2u32), InsertOutcome::Inserted);
        assert!(ic.is_full());
        assert_eq!(ic.len(), 2);
        assert_eq!(ic.capacity(), 2);
    }

    #[test]
    fn test_find_touches() {
        let mut ic = PolyIc::new(2, 8, 100);
        ic.tick();
        ic.insert(1u32);
        ic.tick();
        ic.insert(2u32);
        ic.tick();
        assert_eq!(ic.find(|v| *v == 1), Some(&1));
        assert_eq!(ic.find(|v| *v == 3), None);

        // 2 is now least recently used.
        ic.tick();
        assert_eq!(ic.insert(3u32), InsertOutcome::Evicted);
        let mut values: Vec<u32> = ic.iter().copied().collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn test_repeated_evictions_go_megamorphic() {
        let mut ic = PolyIc::new(1, 3, 100);
        ic.insert(0u32);
        for i in 1..3 {
            ic.tick();
            assert_eq!(ic.insert(i), InsertOutcome::Evicted);
        }
        ic.tick();
        assert_eq!(ic.insert(9), InsertOutcome::Megamorphic);
        assert!(ic.is_megamorphic());
        assert!(ic.is_empty());
        assert_eq!(ic.insert(10), InsertOutcome::Megamorphic);
    }

    #[test]
    fn test_spread_out_evictions_stay_polymorphic() {
        let mut ic = PolyIc::new(1, 2, 10);
        ic.insert(0u32);
        for i in 1..20u32 {
            for _ in 0..11 {
                ic.tick();
            }
            assert_eq!(ic.insert(i), InsertOutcome::Evicted);
        }
        assert!(!ic.is_megamorphic());
    }

    #[test]
    fn test_retain_and_clear() {
        let mut ic = PolyIc::new(4, 1, 1);
        for i in 0..4u32 {
            ic.insert(i);
        }
        assert_eq!(ic.retain(|v| v % 2 == 0), 2);
        assert_eq!(ic.len(), 2);

        ic.insert(7);
        ic.insert(8);
        assert_eq!(ic.insert(9), InsertOutcome::Megamorphic);
        ic.clear();
        assert!(!ic.is_megamorphic());
        assert_eq!(ic.insert(1), InsertOutcome::Inserted);
    }
}
