// src/pattern.rs
//
// Arpeggiation patterns: index generators walked once per transport repeat.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::TimingResult;
use crate::event::EventId;
use crate::time::TransportTime;
use crate::transport::{Dispatch, Transport};

/// Order in which a pattern visits its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PatternKind {
    /// 0, 1, 2, 3, 0, 1, ...
    #[default]
    Up,
    /// 3, 2, 1, 0, 3, 2, ...
    Down,
    /// 0, 1, 2, 3, 2, 1, 0, 1, ...
    UpDown,
    /// 3, 2, 1, 0, 1, 2, 3, 2, ...
    DownUp,
    /// Two up, one down: 0, 2, 1, 3, 2, then again from 0.
    AlternateUp,
    /// Two down, one up: 3, 1, 2, 0, 1, then again from the top.
    AlternateDown,
    /// Uniformly random index every step.
    Random,
    /// Every index once per cycle, in a fresh random order each cycle.
    RandomOnce,
    /// Random neighbor of the previous index.
    RandomWalk,
}

/// Infinite iterator of indices into a list of `len` values.
///
/// Yields nothing when `len` is zero.
#[derive(Debug, Clone)]
pub struct PatternGenerator {
    kind: PatternKind,
    len: usize,

    /// Next index to yield (signed for the alternate walks).
    cursor: isize,
    steps: usize,
    ascending: bool,

    order: Vec<usize>,
    rng: StdRng,
}

impl PatternGenerator {
    pub fn new(len: usize, kind: PatternKind) -> Self {
        Self::with_rng(len, kind, StdRng::from_entropy())
    }

    /// Deterministic generator for the random kinds.
    pub fn with_seed(len: usize, kind: PatternKind, seed: u64) -> Self {
        Self::with_rng(len, kind, StdRng::seed_from_u64(seed))
    }

    fn with_rng(len: usize, kind: PatternKind, mut rng: StdRng) -> Self {
        let last = len.saturating_sub(1) as isize;
        let cursor = match kind {
            PatternKind::Down | PatternKind::DownUp | PatternKind::AlternateDown => last,
            PatternKind::RandomWalk if len > 0 => rng.gen_range(0..len) as isize,
            _ => 0,
        };

        Self {
            kind,
            len,
            cursor,
            steps: 0,
            ascending: !matches!(kind, PatternKind::DownUp),
            order: Vec::new(),
            rng,
        }
    }

    #[inline]
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Restart with a new length and order, continuing the same random stream.
    pub fn reset(&mut self, len: usize, kind: PatternKind) {
        *self = Self::with_rng(len, kind, self.rng.clone());
    }

    fn bounce(&mut self) -> usize {
        let current = self.cursor;
        let last = self.len as isize - 1;
        if last > 0 {
            if self.ascending && current >= last {
                self.ascending = false;
            } else if !self.ascending && current <= 0 {
                self.ascending = true;
            }
            self.cursor += if self.ascending { 1 } else { -1 };
        }
        current as usize
    }

    fn alternate(&mut self, up: bool) -> usize {
        let current = self.cursor;
        self.steps += 1;

        let odd = self.steps % 2 == 1;
        self.cursor += match (up, odd) {
            (true, true) => 2,
            (true, false) => -1,
            (false, true) => -2,
            (false, false) => 1,
        };

        if self.cursor < 0 || self.cursor >= self.len as isize {
            self.cursor = if up { 0 } else { self.len as isize - 1 };
            self.steps = 0;
        }
        current as usize
    }

    fn random_once(&mut self) -> usize {
        if self.order.is_empty() {
            self.order = (0..self.len).collect();
            self.order.shuffle(&mut self.rng);
            // consumed from the back
            self.order.reverse();
        }
        self.order.pop().unwrap_or(0)
    }

    fn random_walk(&mut self) -> usize {
        let last = self.len as isize - 1;
        if last > 0 {
            self.cursor = if self.cursor <= 0 {
                1
            } else if self.cursor >= last {
                last - 1
            } else if self.rng.gen_bool(0.5) {
                self.cursor - 1
            } else {
                self.cursor + 1
            };
        }
        self.cursor as usize
    }
}

impl Iterator for PatternGenerator {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }

        let index = match self.kind {
            PatternKind::Up => {
                let current = self.cursor as usize;
                self.cursor = ((current + 1) % self.len) as isize;
                current
            }
            PatternKind::Down => {
                let current = self.cursor as usize;
                self.cursor = ((current + self.len - 1) % self.len) as isize;
                current
            }
            PatternKind::UpDown | PatternKind::DownUp => self.bounce(),
            PatternKind::AlternateUp => self.alternate(true),
            PatternKind::AlternateDown => self.alternate(false),
            PatternKind::Random => self.rng.gen_range(0..self.len),
            PatternKind::RandomOnce => self.random_once(),
            PatternKind::RandomWalk => self.random_walk(),
        };
        Some(index)
    }
}

/// A list of values walked in pattern order.
#[derive(Debug, Clone)]
pub struct Pattern<T> {
    values: Vec<T>,
    generator: PatternGenerator,
    index: Option<usize>,
}

impl<T: 'static> Pattern<T> {
    pub fn new(values: Vec<T>, kind: PatternKind) -> Self {
        let generator = PatternGenerator::new(values.len(), kind);
        Self {
            values,
            generator,
            index: None,
        }
    }

    pub fn with_seed(values: Vec<T>, kind: PatternKind, seed: u64) -> Self {
        let generator = PatternGenerator::with_seed(values.len(), kind, seed);
        Self {
            values,
            generator,
            index: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> PatternKind {
        self.generator.kind()
    }

    /// Restart the walk in a new order. A seeded pattern stays seeded.
    pub fn set_kind(&mut self, kind: PatternKind) {
        self.generator.reset(self.values.len(), kind);
        self.index = None;
    }

    #[inline]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Replace the values and restart the walk.
    pub fn set_values(&mut self, values: Vec<T>) {
        self.values = values;
        self.set_kind(self.generator.kind());
    }

    /// Index of the value returned by the last step.
    #[inline]
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Value returned by the last step.
    pub fn value(&self) -> Option<&T> {
        self.index.and_then(|i| self.values.get(i))
    }

    /// Advance one step.
    pub fn next_value(&mut self) -> Option<&T> {
        self.index = self.generator.next();
        self.value()
    }

    /// Hand the pattern to `transport`, stepping once every `interval`
    /// from `start` (default: tick 0).
    pub fn schedule<F>(
        mut self,
        transport: &mut Transport,
        interval: TransportTime,
        start: Option<TransportTime>,
        mut callback: F,
    ) -> TimingResult<EventId>
    where
        F: FnMut(&mut Dispatch<'_>, f64, &T) + 'static,
    {
        transport.schedule_repeat(
            move |dispatch: &mut Dispatch<'_>, time: f64| {
                if let Some(value) = self.next_value() {
                    callback(dispatch, time, value);
                }
            },
            interval,
            start,
            None,
        )
    }
}
