// src/timeline.rs
//
// Sorted log of time-stamped entries.
//
// Every other scheduling structure in the crate (state logs, tempo
// automation, tick offsets, one-shot events, the draw queue) is a
// Timeline underneath.

/// An entry that can be stored on a [`Timeline`].
pub trait Timed {
    /// Position of the entry on the timeline (seconds or ticks).
    fn time(&self) -> f64;
}

/// A sequence of entries kept sorted by time.
///
/// Invariants:
/// - entries are always in ascending time order
/// - entries with equal times keep insertion order
/// - lookups are binary searches (O(log n))
///
/// Mutation requires `&mut self`, so no query can ever observe a
/// partially-sorted sequence.
#[derive(Debug, Clone)]
pub struct Timeline<T> {
    entries: Vec<T>,

    /// Maximum number of retained entries; the oldest are dropped first.
    memory: usize,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            memory: usize::MAX,
        }
    }
}

impl<T: Timed> Timeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a timeline that keeps at most `memory` entries.
    pub fn with_memory(memory: usize) -> Self {
        Self {
            entries: Vec::new(),
            memory: memory.max(1),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }

    /// Mutable access for updating payload fields in place.
    ///
    /// Callers must not change `time()` of any entry.
    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.entries
    }

    // -------------------------------
    // MARK: Search helpers
    // -------------------------------

    /// Number of entries with `time <= t`.
    #[inline]
    fn upper_bound(&self, t: f64) -> usize {
        self.entries.partition_point(|e| e.time() <= t)
    }

    /// Number of entries with `time < t`.
    #[inline]
    fn lower_bound(&self, t: f64) -> usize {
        self.entries.partition_point(|e| e.time() < t)
    }

    // -------------------------------
    // MARK: Mutation
    // -------------------------------

    /// Insert an entry after every entry at or before its time.
    ///
    /// Returns the index it landed at.
    pub fn add(&mut self, entry: T) -> usize {
        debug_assert!(!entry.time().is_nan(), "timeline entries need a time");

        let mut index = self.upper_bound(entry.time());
        self.entries.insert(index, entry);

        if self.entries.len() > self.memory {
            let overflow = self.entries.len() - self.memory;
            self.entries.drain(..overflow);
            index = index.saturating_sub(overflow);
        }
        index
    }

    /// Remove and return the earliest entry.
    pub fn shift(&mut self) -> Option<T> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Remove every entry at or after `after`.
    pub fn cancel(&mut self, after: f64) {
        let index = self.lower_bound(after);
        self.entries.truncate(index);
    }

    /// Remove every entry at or before `time`.
    pub fn cancel_before(&mut self, time: f64) {
        let index = self.upper_bound(time);
        self.entries.drain(..index);
    }

    /// Remove the first entry matching `predicate`.
    pub fn remove_first<F>(&mut self, predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.entries.iter().position(predicate)?;
        Some(self.entries.remove(index))
    }

    /// Keep only the entries matching `predicate`.
    pub fn retain<F>(&mut self, predicate: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.entries.retain(predicate);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // -------------------------------
    // MARK: Queries
    // -------------------------------

    /// The latest entry at or before `time`.
    pub fn get(&self, time: f64) -> Option<&T> {
        let index = self.upper_bound(time);
        index.checked_sub(1).map(|i| &self.entries[i])
    }

    /// The latest entry strictly before `time`.
    pub fn get_before(&self, time: f64) -> Option<&T> {
        let index = self.lower_bound(time);
        index.checked_sub(1).map(|i| &self.entries[i])
    }

    /// The earliest entry strictly after `time`.
    pub fn get_after(&self, time: f64) -> Option<&T> {
        self.entries.get(self.upper_bound(time))
    }

    /// The earliest entry.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.entries.first()
    }

    /// The latest entry.
    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Entries with `time >= start`, in order.
    pub fn iter_from(&self, start: f64) -> std::slice::Iter<'_, T> {
        self.entries[self.lower_bound(start)..].iter()
    }

    /// Entries with `time > start`, in order.
    pub fn iter_after(&self, start: f64) -> std::slice::Iter<'_, T> {
        self.entries[self.upper_bound(start)..].iter()
    }

    /// Entries with `time <= end`, in order.
    pub fn iter_until(&self, end: f64) -> std::slice::Iter<'_, T> {
        self.entries[..self.upper_bound(end)].iter()
    }

    /// Entries with `start <= time < end`, in order.
    pub fn iter_between(&self, start: f64, end: f64) -> std::slice::Iter<'_, T> {
        let lo = self.lower_bound(start);
        let hi = self.lower_bound(end).max(lo);
        self.entries[lo..hi].iter()
    }

    /// Entries with `start <= time <= end`, in order.
    pub fn iter_within(&self, start: f64, end: f64) -> std::slice::Iter<'_, T> {
        let lo = self.lower_bound(start);
        let hi = self.upper_bound(end).max(lo);
        self.entries[lo..hi].iter()
    }

    /// Entries at exactly `time`, in insertion order.
    pub fn iter_at(&self, time: f64) -> std::slice::Iter<'_, T> {
        self.iter_within(time, time)
    }
}

impl<'a, T> IntoIterator for &'a Timeline<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
