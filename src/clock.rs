// src/clock.rs
//
// Pull-based pulse generator.
//
// The clock never advances on its own. Each processing pass asks it for
// the boundaries inside `[last_update, until)` and receives them one at a
// time, so every tick is handled against fully up-to-date state.

use log::{debug, warn};

use crate::error::{TimingResult, check_positive, check_time};
use crate::state_timeline::PlaybackState;
use crate::tick_param::TickParam;
use crate::tick_source::{TICK_EPSILON, TickSource};

/// Something the clock produced while advancing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockEvent {
    /// A tick boundary at `time`; `ticks` is the position reached there.
    Tick { time: f64, ticks: u64 },

    /// The clock started (or resumed) at `time` from `ticks`.
    Start { time: f64, ticks: u64 },

    Stop { time: f64 },

    Pause { time: f64 },
}

impl ClockEvent {
    #[inline]
    pub fn time(&self) -> f64 {
        match *self {
            ClockEvent::Tick { time, .. }
            | ClockEvent::Start { time, .. }
            | ClockEvent::Stop { time }
            | ClockEvent::Pause { time } => time,
        }
    }
}

type TickCallback = Box<dyn FnMut(ClockEvent)>;

/// Seconds of state history kept behind the processed window.
pub(crate) const RETAINED_HISTORY: f64 = 30.0;

/// A free-running tick generator with scheduled start/stop/pause.
///
/// This struct:
/// - derives every position from its [`TickSource`] logs
/// - remembers how far it has been processed
/// - yields state changes before ticks at the same instant
pub struct Clock {
    source: TickSource,

    tick_cursor: f64,
    tick_exclusive: bool,

    state_cursor: f64,
    state_exclusive: bool,

    /// End of the last fully processed window.
    last_update: f64,

    callback: Option<TickCallback>,
}

impl Clock {
    /// Clock ticking `frequency` times per second.
    pub fn new(frequency: f64) -> TimingResult<Self> {
        Ok(Self::with_frequency(TickParam::new(frequency, 1.0)?))
    }

    /// Clock driven by an arbitrary rate parameter (e.g. BPM × PPQ / 60).
    pub fn with_frequency(frequency: TickParam) -> Self {
        Self {
            source: TickSource::new(frequency),
            tick_cursor: 0.0,
            tick_exclusive: false,
            state_cursor: 0.0,
            state_exclusive: false,
            last_update: 0.0,
            callback: None,
        }
    }

    #[inline]
    pub fn frequency(&self) -> &TickParam {
        self.source.frequency()
    }

    #[inline]
    pub fn frequency_mut(&mut self) -> &mut TickParam {
        self.source.frequency_mut()
    }

    /// End of the last fully processed window.
    #[inline]
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    // -------------------------------
    // MARK: State control
    // -------------------------------

    /// Start at `time`, optionally from `offset` ticks.
    ///
    /// Starting an already started clock changes nothing.
    pub fn start(&mut self, time: f64, offset: Option<f64>) -> TimingResult<PlaybackState> {
        check_time(time)?;
        if let Some(ticks) = offset {
            check_time(ticks)?;
        }

        if self.source.state_at(time).is_started() {
            return Ok(PlaybackState::Started);
        }
        if time < self.last_update {
            warn!(
                "clock start at {time:.4}s falls inside the processed window (ends {:.4}s)",
                self.last_update
            );
        }

        debug!("clock start at {time:.4}s offset {offset:?}");
        Ok(self.source.start(time, offset))
    }

    /// Stop at `time`. The next start counts from 0 unless given an offset.
    pub fn stop(&mut self, time: f64) -> TimingResult<()> {
        check_time(time)?;
        debug!("clock stop at {time:.4}s");
        self.source.stop(time);
        Ok(())
    }

    /// Pause at `time`, keeping the tick position.
    pub fn pause(&mut self, time: f64) -> TimingResult<()> {
        check_time(time)?;
        debug!("clock pause at {time:.4}s");
        self.source.pause(time);
        Ok(())
    }

    /// Change the tick rate at `time`.
    pub fn set_rate(&mut self, rate: f64, time: f64) -> TimingResult<()> {
        check_positive("rate", rate)?;
        self.source.frequency_mut().set_value_at_time(rate, time)
    }

    /// Jump to `ticks` at `time` without changing the playback state.
    pub fn set_ticks_at_time(&mut self, ticks: f64, time: f64) -> TimingResult<()> {
        check_time(time)?;
        check_time(ticks)?;
        self.source.set_ticks_at_time(ticks, time);
        Ok(())
    }

    /// Drop every scheduled state change at or after `time`.
    pub fn cancel(&mut self, time: f64) {
        self.source.cancel(time);
    }

    // -------------------------------
    // MARK: Queries
    // -------------------------------

    #[inline]
    pub fn state_at(&self, time: f64) -> PlaybackState {
        self.source.state_at(time)
    }

    /// Whole ticks elapsed at `time`.
    pub fn ticks_at(&self, time: f64) -> u64 {
        (self.source.ticks_at(time) + TICK_EPSILON).floor().max(0.0) as u64
    }

    /// Fractional tick position at `time`.
    #[inline]
    pub fn ticks_at_precise(&self, time: f64) -> f64 {
        self.source.ticks_at(time)
    }

    /// Seconds the clock has been running at `time`.
    #[inline]
    pub fn seconds_at(&self, time: f64) -> f64 {
        self.source.seconds_at(time)
    }

    /// Time at which the position reaches `tick`, continuing from `before`.
    #[inline]
    pub fn time_of_tick(&self, tick: f64, before: f64) -> f64 {
        self.source.time_of_tick(tick, before)
    }

    /// Time of the first multiple of `offset` ticks strictly after `when`.
    pub fn next_tick_time(&self, offset: f64, when: f64) -> TimingResult<f64> {
        check_positive("tick offset", offset)?;
        let current = self.source.ticks_at(when);
        let next = ((current + TICK_EPSILON) / offset).floor() * offset + offset;
        Ok(self.source.time_of_tick(next, when))
    }

    // -------------------------------
    // MARK: Advancing
    // -------------------------------

    /// Next event in `[last processed, until)`, or `None` once the window
    /// is exhausted (which also marks `until` as processed).
    pub fn next_event(&mut self, until: f64) -> Option<ClockEvent> {
        let tick = self
            .source
            .next_tick_time(self.tick_cursor, self.tick_exclusive, until);
        let change = self
            .source
            .next_state_change(self.state_cursor, self.state_exclusive, until);

        match (tick, change) {
            (tick, Some(change)) if tick.is_none_or(|t| change.time <= t) => {
                self.state_cursor = change.time;
                self.state_exclusive = true;

                let time = change.time;
                Some(match change.state {
                    PlaybackState::Started => ClockEvent::Start {
                        time,
                        ticks: self.ticks_at(time),
                    },
                    PlaybackState::Stopped => ClockEvent::Stop { time },
                    PlaybackState::Paused => ClockEvent::Pause { time },
                })
            }
            (Some(time), _) => {
                self.tick_cursor = time;
                self.tick_exclusive = true;

                let ticks = self.source.ticks_at(time).round().max(0.0) as u64;
                Some(ClockEvent::Tick { time, ticks })
            }
            _ => {
                if until > self.last_update {
                    self.tick_cursor = until;
                    self.tick_exclusive = false;
                    self.state_cursor = until;
                    self.state_exclusive = false;
                    self.last_update = until;

                    let horizon = until - RETAINED_HISTORY;
                    if horizon > 0.0 {
                        self.source.forget_before(horizon);
                    }
                }
                None
            }
        }
    }

    /// Register the single callback driven by [`Clock::process`].
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(ClockEvent) + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Advance to `until`, handing every event to the registered callback.
    ///
    /// Returns the number of events produced.
    pub fn process(&mut self, until: f64) -> usize {
        let mut callback = self.callback.take();
        let mut count = 0;

        while let Some(event) = self.next_event(until) {
            if let Some(callback) = callback.as_mut() {
                callback(event);
            }
            count += 1;
        }

        self.callback = callback;
        count
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("source", &self.source)
            .field("last_update", &self.last_update)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ticks(events: &[ClockEvent]) -> Vec<(f64, u64)> {
        events
            .iter()
            .filter_map(|e| match *e {
                ClockEvent::Tick { time, ticks } => Some((time, ticks)),
                _ => None,
            })
            .collect()
    }

    fn drain(clock: &mut Clock, until: f64) -> Vec<ClockEvent> {
        std::iter::from_fn(|| clock.next_event(until)).collect()
    }

    #[test]
    fn test_one_event_per_boundary() {
        let mut clock = Clock::new(4.0).unwrap();
        clock.start(0.0, None).unwrap();

        let events = drain(&mut clock, 1.0);
        assert_eq!(events[0], ClockEvent::Start { time: 0.0, ticks: 0 });

        let ticks = ticks(&events);
        assert_eq!(ticks.len(), 4);
        for (i, (time, tick)) in ticks.iter().enumerate() {
            assert_relative_eq!(*time, i as f64 * 0.25, epsilon = 1e-9);
            assert_eq!(*tick, i as u64);
        }
        assert_eq!(clock.last_update(), 1.0);
    }

    #[test]
    fn test_windows_do_not_overlap() {
        let mut clock = Clock::new(10.0).unwrap();
        clock.start(0.0, None).unwrap();

        let first = ticks(&drain(&mut clock, 0.35));
        let second = ticks(&drain(&mut clock, 0.75));

        assert_eq!(first.iter().map(|t| t.1).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(second.iter().map(|t| t.1).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_start_when_started_is_noop() {
        let mut clock = Clock::new(10.0).unwrap();
        assert_eq!(clock.start(0.0, None), Ok(PlaybackState::Started));
        assert_eq!(clock.start(1.0, Some(50.0)), Ok(PlaybackState::Started));
        assert_eq!(clock.ticks_at(2.0), 20);
    }

    #[test]
    fn test_stop_restarts_from_zero() {
        let mut clock = Clock::new(10.0).unwrap();
        clock.start(0.0, None).unwrap();
        clock.stop(1.0).unwrap();
        clock.start(2.0, None).unwrap();

        assert_eq!(clock.ticks_at(1.0), 0);
        assert_eq!(clock.ticks_at(2.5), 5);

        let events = drain(&mut clock, 3.0);
        assert!(events.contains(&ClockEvent::Stop { time: 1.0 }));
        assert!(events.contains(&ClockEvent::Start { time: 2.0, ticks: 0 }));
    }

    #[test]
    fn test_pause_preserves_position() {
        let mut clock = Clock::new(10.0).unwrap();
        clock.start(0.0, None).unwrap();
        clock.pause(1.0).unwrap();
        clock.start(5.0, None).unwrap();

        assert_eq!(clock.ticks_at(1.0), 10);
        assert_eq!(clock.ticks_at(4.9), 10);
        assert_eq!(clock.state_at(3.0), PlaybackState::Paused);

        let events = drain(&mut clock, 5.15);
        let after_pause: Vec<u64> = ticks(&events)
            .into_iter()
            .filter(|(time, _)| *time >= 5.0)
            .map(|(_, tick)| tick)
            .collect();
        assert_eq!(after_pause, vec![10, 11]);
    }

    #[test]
    fn test_pause_between_boundaries_dispatches_each_tick_once() {
        let mut clock = Clock::new(10.0).unwrap();
        clock.start(0.0, None).unwrap();
        // a fraction of a tick past tick 10
        clock.pause(1.001).unwrap();
        clock.start(2.0, None).unwrap();

        let events = drain(&mut clock, 2.5);
        let ticks = ticks(&events);
        let numbers: Vec<u64> = ticks.iter().map(|t| t.1).collect();
        assert_eq!(numbers, (0..=15).collect::<Vec<_>>());

        // tick 11 waits for the remaining 0.99 of a tick after resuming
        let (time, tick) = ticks[11];
        assert_eq!(tick, 11);
        assert_relative_eq!(time, 2.099, epsilon = 1e-9);
    }

    #[test]
    fn test_long_sessions_keep_bounded_history() {
        let mut clock = Clock::new(10.0).unwrap();
        for i in 0..200 {
            let t = i as f64;
            clock.start(t, None).unwrap();
            clock.pause(t + 0.5).unwrap();
            drain(&mut clock, t + 1.0);
        }

        assert!(clock.source.states().len() <= 2 * (RETAINED_HISTORY as usize + 2));
        assert_eq!(clock.ticks_at(199.75), 1000);
    }

    #[test]
    fn test_set_rate_takes_effect_at_time() {
        let mut clock = Clock::new(10.0).unwrap();
        clock.start(0.0, None).unwrap();
        clock.set_rate(20.0, 1.0).unwrap();

        assert_eq!(clock.ticks_at(1.0), 10);
        assert_eq!(clock.ticks_at(1.5), 20);
        assert!(clock.set_rate(0.0, 2.0).is_err());
    }

    #[test]
    fn test_state_change_precedes_tick() {
        let mut clock = Clock::new(2.0).unwrap();
        clock.start(0.5, None).unwrap();

        let events = drain(&mut clock, 1.0);
        assert!(matches!(events[0], ClockEvent::Start { .. }));
        assert!(matches!(events[1], ClockEvent::Tick { ticks: 0, .. }));
    }

    #[test]
    fn test_callback_process() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut clock = Clock::new(4.0).unwrap();
        clock.set_callback(move |event| sink.borrow_mut().push(event));
        clock.start(0.0, None).unwrap();

        assert_eq!(clock.process(0.5), 3);
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_next_tick_time() {
        let mut clock = Clock::new(10.0).unwrap();
        clock.start(0.0, None).unwrap();

        let next = clock.next_tick_time(5.0, 0.2).unwrap();
        assert_relative_eq!(next, 0.5, epsilon = 1e-9);
        assert!(clock.next_tick_time(0.0, 0.2).is_err());
    }

    #[test]
    fn test_rejects_negative_time() {
        let mut clock = Clock::new(10.0).unwrap();
        assert!(clock.start(-1.0, None).is_err());
        assert!(clock.stop(f64::NAN).is_err());
    }
}
