// src/state_timeline.rs
//
// Log of state changes, answering "what was the state at time T".

use std::fmt;

use crate::timeline::{Timed, Timeline};

/// Playback state of a clock or transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    Started,
    #[default]
    Stopped,
    Paused,
}

impl PlaybackState {
    #[inline]
    pub fn is_started(&self) -> bool {
        matches!(self, PlaybackState::Started)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Started => "started",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// A state that took effect at `time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateEntry<S> {
    pub time: f64,
    pub state: S,
}

impl<S> Timed for StateEntry<S> {
    #[inline]
    fn time(&self) -> f64 {
        self.time
    }
}

/// A timeline of state changes with an implicit initial state.
#[derive(Debug, Clone)]
pub struct StateTimeline<S> {
    entries: Timeline<StateEntry<S>>,
    initial: S,
}

impl<S: Copy + PartialEq> StateTimeline<S> {
    pub fn new(initial: S) -> Self {
        Self {
            entries: Timeline::new(),
            initial,
        }
    }

    /// State in effect before any entry.
    #[inline]
    pub fn initial(&self) -> S {
        self.initial
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that `state` takes effect at `time`.
    pub fn set_state_at(&mut self, state: S, time: f64) {
        self.entries.add(StateEntry { time, state });
    }

    /// The state in effect at `time`.
    pub fn value_at(&self, time: f64) -> S {
        self.entries
            .get(time)
            .map_or(self.initial, |entry| entry.state)
    }

    /// The latest entry at or before `time`.
    pub fn entry_at(&self, time: f64) -> Option<&StateEntry<S>> {
        self.entries.get(time)
    }

    /// The first entry strictly after `time`.
    pub fn next_change_after(&self, time: f64) -> Option<&StateEntry<S>> {
        self.entries.get_after(time)
    }

    /// The latest entry with `state` at or before `time`.
    pub fn last_state(&self, state: S, time: f64) -> Option<&StateEntry<S>> {
        self.entries
            .iter_until(time)
            .rev()
            .find(|entry| entry.state == state)
    }

    /// The first entry with `state` at or after `time`.
    pub fn next_state(&self, state: S, time: f64) -> Option<&StateEntry<S>> {
        self.entries
            .iter_from(time)
            .find(|entry| entry.state == state)
    }

    /// Drop changes that no longer decide the state at or after `time`.
    ///
    /// `value_at` is unchanged for every query at or after `time`.
    pub fn forget_before(&mut self, time: f64) {
        if let Some(keep) = self.entries.get(time).map(|entry| entry.time) {
            self.entries.retain(|entry| entry.time >= keep);
        }
    }

    /// Drop every change at or after `after`.
    pub fn cancel(&mut self, after: f64) {
        self.entries.cancel(after);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StateEntry<S>> {
        self.entries.iter()
    }

    /// Changes at or after `time`.
    pub fn iter_from(&self, time: f64) -> std::slice::Iter<'_, StateEntry<S>> {
        self.entries.iter_from(time)
    }

    /// Changes strictly after `time`.
    pub fn iter_after(&self, time: f64) -> std::slice::Iter<'_, StateEntry<S>> {
        self.entries.iter_after(time)
    }

    /// Changes with `start <= time <= end`.
    pub fn iter_within(&self, start: f64, end: f64) -> std::slice::Iter<'_, StateEntry<S>> {
        self.entries.iter_within(start, end)
    }

    /// Changes with `start <= time < end`.
    pub fn iter_between(&self, start: f64, end: f64) -> std::slice::Iter<'_, StateEntry<S>> {
        self.entries.iter_between(start, end)
    }
}
