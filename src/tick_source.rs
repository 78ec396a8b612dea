// src/tick_source.rs
//
// Start/stop/pause bookkeeping over a TickParam.
//
// Tick positions are never accumulated incrementally. They are derived on
// demand from the state log, the tick-offset log and the rate integral,
// so retroactive queries and rate automation stay exact.

use crate::state_timeline::{PlaybackState, StateEntry, StateTimeline};
use crate::tick_param::TickParam;
use crate::timeline::{Timed, Timeline};

/// Slack used when snapping fractional tick positions to the tick grid.
pub(crate) const TICK_EPSILON: f64 = 1e-6;

/// A tick position forced at a point in time (seek, loop wrap, stop).
#[derive(Debug, Clone, Copy, PartialEq)]
struct TickOffset {
    time: f64,
    ticks: f64,
    seconds: f64,
}

impl Timed for TickOffset {
    #[inline]
    fn time(&self) -> f64 {
        self.time
    }
}

/// Counts ticks of a rate parameter while started.
#[derive(Debug, Clone)]
pub struct TickSource {
    frequency: TickParam,
    states: StateTimeline<PlaybackState>,
    offsets: Timeline<TickOffset>,
}

impl TickSource {
    pub fn new(frequency: TickParam) -> Self {
        Self {
            frequency,
            states: StateTimeline::new(PlaybackState::Stopped),
            offsets: Timeline::new(),
        }
    }

    #[inline]
    pub fn frequency(&self) -> &TickParam {
        &self.frequency
    }

    #[inline]
    pub fn frequency_mut(&mut self) -> &mut TickParam {
        &mut self.frequency
    }

    #[inline]
    pub fn states(&self) -> &StateTimeline<PlaybackState> {
        &self.states
    }

    pub fn state_at(&self, time: f64) -> PlaybackState {
        self.states.value_at(time)
    }

    // -------------------------------
    // MARK: State changes
    // -------------------------------

    /// Start counting at `time`, optionally from `offset` ticks.
    ///
    /// Does nothing if already started at `time`.
    pub fn start(&mut self, time: f64, offset: Option<f64>) -> PlaybackState {
        if self.states.value_at(time) != PlaybackState::Started {
            self.states.set_state_at(PlaybackState::Started, time);
            if let Some(ticks) = offset {
                self.set_ticks_at_time(ticks, time);
            }
        }
        PlaybackState::Started
    }

    /// Stop at `time`, discarding later state changes and rewinding to 0.
    pub fn stop(&mut self, time: f64) {
        if self.states.value_at(time) == PlaybackState::Stopped {
            // Re-stopping moves the earlier stop instead of stacking a second one.
            if let Some(entry) = self.states.entry_at(time).copied() {
                if entry.time > 0.0 {
                    self.offsets.cancel(entry.time);
                    self.states.cancel(entry.time);
                }
            }
        }
        self.states.cancel(time);
        self.states.set_state_at(PlaybackState::Stopped, time);
        self.set_ticks_at_time(0.0, time);
    }

    /// Freeze the tick count at `time`. Only valid while started.
    pub fn pause(&mut self, time: f64) {
        if self.states.value_at(time) == PlaybackState::Started {
            self.states.set_state_at(PlaybackState::Paused, time);
        }
    }

    /// Drop every state change and offset at or after `time`.
    pub fn cancel(&mut self, time: f64) {
        self.states.cancel(time);
        self.offsets.cancel(time);
    }

    /// Force the tick count to `ticks` at `time`.
    pub fn set_ticks_at_time(&mut self, ticks: f64, time: f64) {
        self.offsets.cancel(time);
        let seconds = self.frequency.duration_of_ticks(ticks, time);
        self.offsets.add(TickOffset {
            time,
            ticks,
            seconds,
        });
    }

    /// Discard history that queries at or after `time` never read.
    ///
    /// The position at `time` is kept as a checkpoint offset, so later
    /// queries stay exact. Queries before `time` are no longer meaningful.
    pub fn forget_before(&mut self, time: f64) {
        if self.states.is_empty() {
            return;
        }

        if self.offsets.get(time).is_none_or(|offset| offset.time < time) {
            let checkpoint = TickOffset {
                time,
                ticks: self.ticks_at(time),
                seconds: self.seconds_at(time),
            };
            self.offsets.add(checkpoint);
        }
        self.offsets.retain(|offset| offset.time >= time);
        self.states.forget_before(time);
    }

    // -------------------------------
    // MARK: Position queries
    // -------------------------------

    /// Fractional tick position at `time`.
    pub fn ticks_at(&self, time: f64) -> f64 {
        self.walk(time, |source, from, to| {
            source.frequency.ticks_at(to) - source.frequency.ticks_at(from)
        }, |offset| offset.ticks)
    }

    /// Seconds of running time at `time`, counting seek offsets.
    pub fn seconds_at(&self, time: f64) -> f64 {
        self.walk(time, |_, from, to| to - from, |offset| offset.seconds)
    }

    /// Replay the state changes after the latest offset (or stop) before
    /// `time`, accumulating `elapsed` over started spans.
    fn walk<E, R>(&self, time: f64, elapsed: E, reset: R) -> f64
    where
        E: Fn(&Self, f64, f64) -> f64,
        R: Fn(&TickOffset) -> f64,
    {
        let stopped_at = self
            .states
            .last_state(PlaybackState::Stopped, time)
            .map(|entry| entry.time);
        let offset = self
            .offsets
            .get(time)
            .filter(|offset| stopped_at.is_none_or(|stop| offset.time >= stop));

        let (mut total, mut since) = match offset {
            Some(offset) => (reset(offset), offset.time),
            None => (0.0, stopped_at.unwrap_or(f64::NEG_INFINITY)),
        };
        // Entries sharing `since` are already reflected in value_at.
        let mut running = self.states.value_at(since).is_started();

        for entry in self.states.iter_after(since).take_while(|e| e.time <= time) {
            if running {
                total += elapsed(self, since, entry.time);
            }
            running = entry.state.is_started();
            since = entry.time;
        }

        if running {
            total += elapsed(self, since, time);
        }
        total
    }

    /// Time at which the tick count reaches `tick`, assuming the source keeps
    /// running unchanged from `before`.
    pub fn time_of_tick(&self, tick: f64, before: f64) -> f64 {
        let current = self.ticks_at(before);
        let absolute = self.frequency.ticks_at(before) + (tick - current);
        self.frequency.time_of_tick(absolute)
    }

    // -------------------------------
    // MARK: Tick boundaries
    // -------------------------------

    /// Earliest tick boundary in `[after, until)` (or `(after, until)` when
    /// `exclusive`) that falls inside a started span.
    ///
    /// Boundaries are the instants the tick position crosses an integer.
    /// After a mid-tick pause the first boundary is the next whole tick,
    /// reached once the fractional remainder has elapsed.
    pub(crate) fn next_tick_time(&self, after: f64, exclusive: bool, until: f64) -> Option<f64> {
        let mut t = after;
        let mut exclusive = exclusive;

        while t < until {
            let entry = self.states.entry_at(t).copied();
            let next_state = self.states.next_change_after(t).map(|e| e.time);

            let Some(entry) = entry.filter(|e| e.state.is_started()) else {
                t = next_state?;
                exclusive = false;
                continue;
            };

            let anchor = self
                .offsets
                .get(t)
                .map_or(entry.time, |offset| offset.time.max(entry.time));
            let next_offset = self.offsets.get_after(t).map(|o| o.time);
            let segment_end = match (next_state, next_offset) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => f64::INFINITY,
            };

            let base = self.frequency.ticks_at(anchor);
            let anchor_ticks = self.ticks_at(anchor);
            let position = anchor_ticks + self.frequency.ticks_at(t) - base;
            let next = if exclusive {
                (position + TICK_EPSILON).floor() + 1.0
            } else {
                (position - TICK_EPSILON).ceil().max(0.0)
            };

            let mut tick_time = self.frequency.time_of_tick(base + (next - anchor_ticks));
            if !exclusive {
                tick_time = tick_time.max(t);
            }

            if tick_time < segment_end && tick_time < until {
                return Some(tick_time);
            }
            if segment_end >= until {
                return None;
            }
            t = segment_end;
            exclusive = false;
        }
        None
    }

    /// Earliest state change in `[after, until)` (or `(after, until)`).
    pub(crate) fn next_state_change(
        &self,
        after: f64,
        exclusive: bool,
        until: f64,
    ) -> Option<StateEntry<PlaybackState>> {
        let entry = if exclusive {
            self.states.next_change_after(after)
        } else {
            self.states.iter_from(after).next()
        }?;

        if entry.time >= until {
            return None;
        }
        // Several changes at one instant collapse to the one recorded last.
        Some(StateEntry {
            time: entry.time,
            state: self.states.value_at(entry.time),
        })
    }
}
