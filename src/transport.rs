// src/transport.rs
//
// Master musical-time scheduler.
//
// The transport owns a Clock ticking at BPM × PPQ / 60, turns each tick into
// a musical position (applying loop wraps), and dispatches the events due at
// that position. All positions are derived from the clock's logs, so every
// query works retroactively and through tempo automation.

use std::fmt;

use log::{debug, trace, warn};

use crate::clock::{Clock, ClockEvent, RETAINED_HISTORY};
use crate::context::ContextHandle;
use crate::draw::Draw;
use crate::emitter::{Emitter, ListenerId, TransportEvent, TransportEventKind};
use crate::error::{TimingError, TimingResult, check_positive, check_time};
use crate::event::{EventCallback, EventId, Recurrence};
use crate::scheduler::EventStore;
use crate::state_timeline::{PlaybackState, StateTimeline};
use crate::tick_param::TickParam;
use crate::tick_source::TICK_EPSILON;
use crate::time::{BarsBeatsSixteenths, DEFAULT_PPQ, Notation, TimeSignature, TransportTime};

const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_LOOP_MEASURES: f64 = 4.0;

//
// ===============================
// MARK: Configuration
// ===============================
//

/// Initial settings of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportConfig {
    pub bpm: f64,
    /// Pulses per quarter note. Fixed for the transport's lifetime.
    pub ppq: u32,
    pub time_signature: TimeSignature,
    /// Swing amount in `[0, 1]`.
    pub swing: f64,
    pub swing_subdivision: Notation,
    pub loop_start: TransportTime,
    pub loop_end: TransportTime,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            ppq: DEFAULT_PPQ,
            time_signature: TimeSignature::default(),
            swing: 0.0,
            swing_subdivision: Notation::EIGHTH,
            loop_start: TransportTime::Ticks(0),
            loop_end: TransportTime::Measures(DEFAULT_LOOP_MEASURES),
        }
    }
}

//
// ===============================
// MARK: Dispatch scope
// ===============================
//

/// What a transport callback may touch while it runs.
///
/// Callbacks can schedule and clear events, change tempo or loop points,
/// and queue draw work. Nested `process` calls are refused.
pub struct Dispatch<'a> {
    pub transport: &'a mut Transport,
    pub draw: &'a mut Draw,
}

//
// ===============================
// MARK: Transport
// ===============================
//

/// Musical-time transport.
///
/// This struct:
/// - owns tempo, position, looping, swing and scheduled events
/// - is driven by [`Transport::process`], one window at a time
/// - hands callbacks the exact scheduled time, not "now"
pub struct Transport {
    context: ContextHandle,
    clock: Clock,

    ppq: u32,
    time_signature: TimeSignature,

    loop_enabled: StateTimeline<bool>,
    loop_start: u64,
    loop_end: u64,

    swing: f64,
    swing_subdivision: Notation,
    swing_ticks: u64,

    events: EventStore,
    emitter: Emitter,

    /// Tick whose events are being (or were just) dispatched in the
    /// current pass. `None` outside `process`.
    dispatching: Option<u64>,
    processing: bool,
    disposed: bool,

    due: Vec<EventId>,
}

impl Transport {
    pub fn new(context: ContextHandle, config: TransportConfig) -> TimingResult<Self> {
        if config.ppq == 0 {
            return Err(TimingError::InvalidValue {
                name: "ppq",
                expected: "at least 1",
                value: 0.0,
            });
        }
        check_positive("bpm", config.bpm)?;
        let bpm = TickParam::new(config.bpm, f64::from(config.ppq) / 60.0)?;

        let mut transport = Self {
            context,
            clock: Clock::with_frequency(bpm),
            ppq: config.ppq,
            time_signature: config.time_signature,
            loop_enabled: StateTimeline::new(false),
            loop_start: 0,
            loop_end: 0,
            swing: 0.0,
            swing_subdivision: config.swing_subdivision,
            swing_ticks: 0,
            events: EventStore::new(),
            emitter: Emitter::new(),
            dispatching: None,
            processing: false,
            disposed: false,
            due: Vec::new(),
        };

        transport.set_swing(config.swing)?;
        transport.set_swing_subdivision(config.swing_subdivision)?;
        transport.set_loop_points(config.loop_start, config.loop_end)?;
        Ok(transport)
    }

    /// Scheduling time of the owning context (host time plus lookahead).
    #[inline]
    pub fn now(&self) -> f64 {
        self.context.now()
    }

    #[inline]
    pub fn ppq(&self) -> u32 {
        self.ppq
    }

    fn ensure_live(&self) -> TimingResult<()> {
        if self.disposed {
            Err(TimingError::Disposed("transport"))
        } else {
            Ok(())
        }
    }

    fn resolve_time(&self, time: Option<f64>) -> TimingResult<f64> {
        match time {
            Some(time) => check_time(time),
            None => Ok(self.now()),
        }
    }

    // -------------------------------
    // MARK: Playback state
    // -------------------------------

    /// Start at `time` (default: now), from `offset` if given, otherwise
    /// resuming from the current position.
    pub fn start(&mut self, time: Option<f64>, offset: Option<TransportTime>) -> TimingResult<()> {
        self.ensure_live()?;
        let time = self.resolve_time(time)?;
        let offset = match offset {
            Some(offset) => Some(self.to_ticks(offset)? as f64),
            None => None,
        };

        debug!("transport start at {time:.4}s offset {offset:?}");
        self.clock.start(time, offset)?;
        Ok(())
    }

    /// Stop at `time` (default: now) and rewind to 0.
    ///
    /// Pending one-shot events at or after the stop position are cancelled.
    /// Events before it have already fired and are gone, so nothing
    /// scheduled with `schedule`/`schedule_once` fires again after a restart.
    /// Repeating events stay registered and resume with the next start.
    pub fn stop(&mut self, time: Option<f64>) -> TimingResult<()> {
        self.ensure_live()?;
        let time = self.resolve_time(time)?;

        if self.clock.state_at(time) != PlaybackState::Stopped {
            let position = self.clock.ticks_at(time);
            let cancelled = self.events.cancel_from(position, false);
            if cancelled > 0 {
                debug!("transport stop cancelled {cancelled} pending events from tick {position}");
            }
        }
        self.events.clear_overdue();

        debug!("transport stop at {time:.4}s");
        self.clock.stop(time)
    }

    /// Pause at `time` (default: now), keeping the position.
    pub fn pause(&mut self, time: Option<f64>) -> TimingResult<()> {
        self.ensure_live()?;
        let time = self.resolve_time(time)?;
        debug!("transport pause at {time:.4}s");
        self.clock.pause(time)
    }

    /// Stop if started, otherwise start.
    pub fn toggle(&mut self, time: Option<f64>) -> TimingResult<()> {
        let time = self.resolve_time(time)?;
        if self.clock.state_at(time).is_started() {
            self.stop(Some(time))
        } else {
            self.start(Some(time), None)
        }
    }

    /// Playback state at `now()`.
    pub fn state(&self) -> PlaybackState {
        self.clock.state_at(self.now())
    }

    pub fn state_at(&self, time: f64) -> PlaybackState {
        self.clock.state_at(time)
    }

    // -------------------------------
    // MARK: Scheduling
    // -------------------------------

    /// Fire `callback` once when the playhead reaches `time`, then forget it.
    ///
    /// A position already behind the playhead fires on the next tick
    /// processed. Loop passes do not fire it again; use
    /// [`Transport::schedule_repeat`] for that.
    pub fn schedule<F>(&mut self, callback: F, time: TransportTime) -> TimingResult<EventId>
    where
        F: FnMut(&mut Dispatch<'_>, f64) + 'static,
    {
        let tick = self.to_ticks(time)?;
        self.insert(Recurrence::Once { tick }, Box::new(callback))
    }

    /// Same as [`Transport::schedule`].
    #[inline]
    pub fn schedule_once<F>(&mut self, callback: F, time: TransportTime) -> TimingResult<EventId>
    where
        F: FnMut(&mut Dispatch<'_>, f64) + 'static,
    {
        self.schedule(callback, time)
    }

    /// Fire `callback` every `interval` from `start`, for `duration` if given
    /// (exclusive), otherwise until cleared.
    ///
    /// `start` defaults to tick 0, not the current position. A repeat
    /// registered mid-playback therefore stays on the grid of tick 0; pass
    /// `Some(TransportTime::Ticks(transport.ticks()))` to phase it from the
    /// playhead instead.
    pub fn schedule_repeat<F>(
        &mut self,
        callback: F,
        interval: TransportTime,
        start: Option<TransportTime>,
        duration: Option<TransportTime>,
    ) -> TimingResult<EventId>
    where
        F: FnMut(&mut Dispatch<'_>, f64) + 'static,
    {
        let interval_ticks = self.to_ticks(interval)?;
        if interval_ticks == 0 {
            return Err(TimingError::InvalidValue {
                name: "repeat interval",
                expected: "at least one tick",
                value: 0.0,
            });
        }
        let start = match start {
            Some(start) => self.to_ticks(start)?,
            None => 0,
        };
        let end = match duration {
            Some(duration) => Some(start + self.to_ticks(duration)?),
            None => None,
        };

        self.insert(
            Recurrence::Repeat {
                start,
                interval: interval_ticks,
                end,
            },
            Box::new(callback),
        )
    }

    fn insert(&mut self, recurrence: Recurrence, callback: EventCallback) -> TimingResult<EventId> {
        self.ensure_live()?;
        let id = self.events.insert(recurrence, callback);

        if let Some(tick) = recurrence.tick() {
            if self.is_behind_playhead(tick) {
                trace!("event {id} at tick {tick} is behind the playhead, firing next tick");
                self.events.mark_overdue(id);
            }
        }
        Ok(id)
    }

    /// Whether `tick` has already been passed by dispatch.
    fn is_behind_playhead(&self, tick: u64) -> bool {
        match self.dispatching {
            Some(current) => tick <= current,
            None => {
                let processed = self.clock.ticks_at_precise(self.clock.last_update());
                (tick as f64) < processed - TICK_EPSILON
            }
        }
    }

    /// Remove an event. Unknown or already fired ids are ignored.
    ///
    /// Takes effect immediately, even for boundaries in the current window.
    pub fn clear(&mut self, id: EventId) -> bool {
        self.events.remove(id)
    }

    /// Remove every event starting at or after `after`.
    pub fn cancel(&mut self, after: TransportTime) -> TimingResult<usize> {
        self.ensure_live()?;
        let tick = self.to_ticks(after)?;
        Ok(self.events.cancel_from(tick, true))
    }

    /// Number of registered events.
    #[inline]
    pub fn scheduled_count(&self) -> usize {
        self.events.len()
    }

    /// Whether `id` is still registered.
    #[inline]
    pub fn is_scheduled(&self, id: EventId) -> bool {
        self.events.contains(id)
    }

    // -------------------------------
    // MARK: Processing
    // -------------------------------

    /// Advance through `[last processed, until)`, dispatching every due
    /// event in tick order. Returns the number of callbacks invoked.
    pub fn process(&mut self, until: f64, draw: &mut Draw) -> usize {
        if self.disposed {
            return 0;
        }
        if self.processing {
            warn!("transport process({until:.4}) called from inside a callback, ignored");
            return 0;
        }

        self.processing = true;
        let mut invoked = 0;

        while let Some(event) = self.clock.next_event(until) {
            match event {
                ClockEvent::Tick { time, ticks } => {
                    invoked += self.process_tick(time, ticks, draw);
                }
                ClockEvent::Start { time, .. } => {
                    let offset = self.clock.seconds_at(time);
                    debug!("transport started at {time:.4}s ({offset:.4}s in)");
                    self.emitter.emit(&TransportEvent::Start { time, offset });
                }
                ClockEvent::Stop { time } => {
                    debug!("transport stopped at {time:.4}s");
                    self.emitter.emit(&TransportEvent::Stop { time });
                }
                ClockEvent::Pause { time } => {
                    debug!("transport paused at {time:.4}s");
                    self.emitter.emit(&TransportEvent::Pause { time });
                }
            }
        }

        let horizon = until - RETAINED_HISTORY;
        if horizon > 0.0 {
            self.loop_enabled.forget_before(horizon);
        }

        self.dispatching = None;
        self.processing = false;
        invoked
    }

    fn process_tick(&mut self, tick_time: f64, ticks: u64, draw: &mut Draw) -> usize {
        if !(self.loop_enabled.value_at(tick_time) && ticks >= self.loop_end) {
            return self.dispatch_tick(ticks, tick_time, draw, &[]);
        }

        // Events exactly at loop end belong to the pass that is ending.
        let mut invoked = 0;
        let mut fired = Vec::new();
        if ticks == self.loop_end {
            invoked += self.dispatch_tick(ticks, tick_time, draw, &[]);
            fired = self.due.clone();
        }

        self.emitter.emit(&TransportEvent::LoopEnd { time: tick_time });
        // Both values were validated when the loop points were set.
        if let Err(err) = self
            .clock
            .set_ticks_at_time(self.loop_start as f64, tick_time)
        {
            warn!("loop wrap at {tick_time:.4}s failed: {err}");
            return invoked;
        }
        trace!("loop wrap at {tick_time:.4}s: tick {ticks} -> {}", self.loop_start);

        let offset = self.clock.seconds_at(tick_time);
        self.emitter.emit(&TransportEvent::LoopStart {
            time: tick_time,
            offset,
        });
        self.emitter.emit(&TransportEvent::Loop { time: tick_time });

        invoked + self.dispatch_tick(self.loop_start, tick_time, draw, &fired)
    }

    /// Dispatch overdue events and everything due at `ticks`, skipping `skip`.
    fn dispatch_tick(&mut self, ticks: u64, tick_time: f64, draw: &mut Draw, skip: &[EventId]) -> usize {
        let mut invoked = 0;

        if self.events.has_overdue() {
            for id in self.events.take_overdue() {
                invoked += usize::from(self.invoke(id, tick_time, draw));
            }
        }

        let mut due = std::mem::take(&mut self.due);
        self.events.collect_due(ticks, &mut due);
        self.dispatching = Some(ticks);

        let time = self.swing_time(ticks, tick_time);
        for &id in due.iter().filter(|id| !skip.contains(id)) {
            invoked += usize::from(self.invoke(id, time, draw));
        }

        self.due = due;
        invoked
    }

    /// Run one event's callback with the dispatch scope.
    fn invoke(&mut self, id: EventId, time: f64, draw: &mut Draw) -> bool {
        // Cleared (or already running) events have no callback to lend.
        let Some(mut callback) = self.events.take_callback(id) else {
            return false;
        };

        trace!("dispatch {id} at {time:.6}s");
        {
            let mut scope = Dispatch {
                transport: &mut *self,
                draw: &mut *draw,
            };
            callback(&mut scope, time);
        }

        self.events.restore_callback(id, callback);
        true
    }

    /// Delay off-beat subdivisions by the swing amount.
    fn swing_time(&self, ticks: u64, tick_time: f64) -> f64 {
        let pair = self.swing_ticks * 2;
        if self.swing <= 0.0 || pair == 0 || ticks % u64::from(self.ppq) == 0 || ticks % pair == 0 {
            return tick_time;
        }

        let progress = (ticks % pair) as f64 / pair as f64;
        let amount = (progress * std::f64::consts::PI).sin() * self.swing;
        let delay = self
            .bpm()
            .duration_of_ticks(pair as f64 / 3.0, tick_time);
        tick_time + delay * amount
    }

    // -------------------------------
    // MARK: Conversions
    // -------------------------------

    /// Resolve a time expression to ticks (rounded).
    pub fn to_ticks(&self, time: TransportTime) -> TimingResult<u64> {
        let ticks = match time {
            TransportTime::Seconds(seconds) => self.seconds_to_ticks(check_time(seconds)?),
            TransportTime::Ticks(ticks) => return Ok(ticks),
            TransportTime::Note(note) => note.ticks(self.ppq),
            TransportTime::Measures(measures) => {
                check_time(measures)? * self.time_signature.ticks_per_measure(self.ppq)
            }
            TransportTime::Position(position) => {
                return Ok(position.to_ticks(self.ppq, self.time_signature));
            }
        };
        Ok(ticks.round().max(0.0) as u64)
    }

    /// Resolve a time expression to seconds along the tempo curve.
    pub fn to_seconds(&self, time: TransportTime) -> TimingResult<f64> {
        match time {
            TransportTime::Seconds(seconds) => check_time(seconds),
            other => Ok(self.ticks_to_seconds(self.to_ticks(other)? as f64)),
        }
    }

    /// Ticks elapsed in `seconds` of transport time, integrating the tempo.
    #[inline]
    pub fn seconds_to_ticks(&self, seconds: f64) -> f64 {
        self.bpm().ticks_at(seconds)
    }

    /// Exact inverse of [`Transport::seconds_to_ticks`].
    #[inline]
    pub fn ticks_to_seconds(&self, ticks: f64) -> f64 {
        self.bpm().time_of_tick(ticks)
    }

    pub fn ticks_to_position(&self, ticks: u64) -> BarsBeatsSixteenths {
        BarsBeatsSixteenths::from_ticks(ticks, self.ppq, self.time_signature)
    }

    pub fn position_to_ticks(&self, position: BarsBeatsSixteenths) -> u64 {
        position.to_ticks(self.ppq, self.time_signature)
    }

    /// Transport position in ticks at context time `time`.
    #[inline]
    pub fn ticks_at_time(&self, time: f64) -> u64 {
        self.clock.ticks_at(time)
    }

    /// Transport position in seconds at context time `time`.
    #[inline]
    pub fn seconds_at_time(&self, time: f64) -> f64 {
        self.clock.seconds_at(time)
    }

    /// Context time of the next `subdivision` boundary after `now()`, or
    /// `None` while not started.
    pub fn next_subdivision(&self, subdivision: TransportTime) -> TimingResult<Option<f64>> {
        let ticks = self.to_ticks(subdivision)?;
        let now = self.now();
        if !self.clock.state_at(now).is_started() {
            return Ok(None);
        }
        self.clock.next_tick_time(ticks as f64, now).map(Some)
    }

    // -------------------------------
    // MARK: Position
    // -------------------------------

    /// Position in ticks at `now()`.
    pub fn ticks(&self) -> u64 {
        self.clock.ticks_at(self.now())
    }

    /// Move the playhead to `ticks`.
    ///
    /// While started, the jump lands on the next tick boundary so no tick
    /// is skipped or repeated.
    pub fn set_ticks(&mut self, ticks: u64) -> TimingResult<()> {
        self.ensure_live()?;
        let now = self.now();

        let time = if self.clock.state_at(now).is_started() {
            let current = self.clock.ticks_at_precise(now);
            let remaining = (current - TICK_EPSILON).ceil().max(current) - current;
            now + self.bpm().duration_of_ticks(remaining, now)
        } else {
            now
        };

        debug!("transport position -> tick {ticks} at {time:.4}s");
        self.clock.set_ticks_at_time(ticks as f64, time)
    }

    pub fn position(&self) -> BarsBeatsSixteenths {
        self.ticks_to_position(self.ticks())
    }

    pub fn set_position(&mut self, position: BarsBeatsSixteenths) -> TimingResult<()> {
        self.set_ticks(self.position_to_ticks(position))
    }

    /// Position in seconds at `now()`.
    pub fn seconds(&self) -> f64 {
        self.clock.seconds_at(self.now())
    }

    pub fn set_seconds(&mut self, seconds: f64) -> TimingResult<()> {
        let ticks = self.to_ticks(TransportTime::Seconds(seconds))?;
        self.set_ticks(ticks)
    }

    /// Fraction of the loop played at `now()`; 0 when not looping.
    pub fn progress(&self) -> f64 {
        let now = self.now();
        if !self.loop_enabled.value_at(now) || self.loop_end <= self.loop_start {
            return 0.0;
        }
        let ticks = self.clock.ticks_at_precise(now);
        let span = (self.loop_end - self.loop_start) as f64;
        ((ticks - self.loop_start as f64) / span).clamp(0.0, 1.0)
    }

    // -------------------------------
    // MARK: Tempo, meter and swing
    // -------------------------------

    /// Tempo in BPM, with its automation.
    #[inline]
    pub fn bpm(&self) -> &TickParam {
        self.clock.frequency()
    }

    /// Tempo for scheduling ramps and steps.
    #[inline]
    pub fn bpm_mut(&mut self) -> &mut TickParam {
        self.clock.frequency_mut()
    }

    /// Jump to `bpm` at `time` (default: now).
    pub fn set_bpm(&mut self, bpm: f64, time: Option<f64>) -> TimingResult<()> {
        self.ensure_live()?;
        let time = self.resolve_time(time)?;
        self.clock.frequency_mut().set_value_at_time(bpm, time)
    }

    #[inline]
    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) -> TimingResult<()> {
        self.ensure_live()?;
        self.time_signature = signature;
        Ok(())
    }

    #[inline]
    pub fn swing(&self) -> f64 {
        self.swing
    }

    pub fn set_swing(&mut self, amount: f64) -> TimingResult<()> {
        self.ensure_live()?;
        if !(0.0..=1.0).contains(&amount) {
            return Err(TimingError::InvalidValue {
                name: "swing",
                expected: "between 0 and 1",
                value: amount,
            });
        }
        self.swing = amount;
        Ok(())
    }

    #[inline]
    pub fn swing_subdivision(&self) -> Notation {
        self.swing_subdivision
    }

    pub fn set_swing_subdivision(&mut self, subdivision: Notation) -> TimingResult<()> {
        self.ensure_live()?;
        self.swing_subdivision = subdivision;
        self.swing_ticks = subdivision.ticks(self.ppq).round() as u64;
        Ok(())
    }

    // -------------------------------
    // MARK: Looping
    // -------------------------------

    /// Whether looping is enabled at `now()`.
    pub fn is_looping(&self) -> bool {
        self.loop_enabled.value_at(self.now())
    }

    /// Enable or disable looping from `now()`.
    pub fn set_loop(&mut self, enabled: bool) -> TimingResult<()> {
        let now = self.now();
        self.set_loop_at(enabled, now)
    }

    /// Enable or disable looping from `time`.
    pub fn set_loop_at(&mut self, enabled: bool, time: f64) -> TimingResult<()> {
        self.ensure_live()?;
        let time = check_time(time)?;
        self.loop_enabled.set_state_at(enabled, time);
        debug!("transport loop {} at {time:.4}s", if enabled { "on" } else { "off" });
        Ok(())
    }

    #[inline]
    pub fn loop_start(&self) -> u64 {
        self.loop_start
    }

    #[inline]
    pub fn loop_end(&self) -> u64 {
        self.loop_end
    }

    pub fn set_loop_start(&mut self, start: TransportTime) -> TimingResult<()> {
        let start = self.to_ticks(start)?;
        self.apply_loop_points(start, self.loop_end)
    }

    pub fn set_loop_end(&mut self, end: TransportTime) -> TimingResult<()> {
        let end = self.to_ticks(end)?;
        self.apply_loop_points(self.loop_start, end)
    }

    pub fn set_loop_points(&mut self, start: TransportTime, end: TransportTime) -> TimingResult<()> {
        let start = self.to_ticks(start)?;
        let end = self.to_ticks(end)?;
        self.apply_loop_points(start, end)
    }

    fn apply_loop_points(&mut self, start: u64, end: u64) -> TimingResult<()> {
        self.ensure_live()?;
        if end <= start {
            return Err(TimingError::InvalidLoop { start, end });
        }
        self.loop_start = start;
        self.loop_end = end;
        debug!("transport loop points {start}..{end} ticks");
        Ok(())
    }

    // -------------------------------
    // MARK: Notifications and lifecycle
    // -------------------------------

    pub fn on<F>(&mut self, kind: TransportEventKind, listener: F) -> ListenerId
    where
        F: FnMut(&TransportEvent) + 'static,
    {
        self.emitter.on(kind, listener)
    }

    pub fn on_any<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&TransportEvent) + 'static,
    {
        self.emitter.on_any(listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    /// Drop every event and listener. Later mutating calls fail.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.events.clear_all();
        self.emitter.clear();
        self.disposed = true;
        debug!("transport disposed");
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("ppq", &self.ppq)
            .field("time_signature", &self.time_signature)
            .field("loop", &(self.loop_start..self.loop_end))
            .field("swing", &self.swing)
            .field("events", &self.events.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextConfig, ManualClock};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<f64>>>;

    fn transport() -> (ManualClock, Transport, Draw) {
        let clock = ManualClock::new(0.0);
        let handle = ContextHandle::new(Rc::new(clock.clone()), ContextConfig::default()).unwrap();
        let transport = Transport::new(handle, TransportConfig::default()).unwrap();
        (clock, transport, Draw::new())
    }

    fn at(text: &str) -> TransportTime {
        text.parse().unwrap()
    }

    fn record(log: &Log) -> impl FnMut(&mut Dispatch<'_>, f64) + 'static {
        let log = Rc::clone(log);
        move |_: &mut Dispatch<'_>, time: f64| log.borrow_mut().push(time)
    }

    fn assert_times(log: &Log, expected: &[f64]) {
        let times = log.borrow();
        assert_eq!(times.len(), expected.len(), "fired at {times:?}");
        for (time, want) in times.iter().zip(expected) {
            assert_relative_eq!(*time, *want, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_repeat_fires_on_each_quarter() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();

        transport.start(Some(0.0), None).unwrap();
        transport
            .schedule_repeat(record(&log), at("4n"), None, None)
            .unwrap();
        transport.process(2.0, &mut draw);

        assert_times(&log, &[0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_one_shots_fire_in_time_order_once() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();
        let ticks = [480, 96, 1000, 12, 700];

        for tick in ticks {
            transport
                .schedule_once(record(&log), TransportTime::Ticks(tick))
                .unwrap();
        }
        transport.start(Some(0.0), None).unwrap();
        transport.process(3.0, &mut draw);
        transport.process(6.0, &mut draw);

        let mut sorted = ticks;
        sorted.sort_unstable();
        let expected: Vec<f64> = sorted.iter().map(|t| *t as f64 / 384.0).collect();
        assert_times(&log, &expected);
        assert_eq!(transport.scheduled_count(), 0);
    }

    #[test]
    fn test_clear_before_and_after_firing() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();

        let cancelled = transport.schedule(record(&log), at("4n")).unwrap();
        let fired = transport.schedule_once(record(&log), at("0i")).unwrap();
        assert!(transport.clear(cancelled));

        transport.start(Some(0.0), None).unwrap();
        transport.process(1.0, &mut draw);

        assert_times(&log, &[0.0]);
        assert!(!transport.is_scheduled(fired));
        assert!(!transport.clear(fired));
        assert!(!transport.clear(cancelled));
    }

    #[test]
    fn test_clear_inside_current_window() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();
        let victim = Rc::new(Cell::new(None));

        let target = Rc::clone(&victim);
        transport
            .schedule(
                move |dispatch: &mut Dispatch<'_>, _| {
                    if let Some(id) = target.get() {
                        dispatch.transport.clear(id);
                    }
                },
                at("0i"),
            )
            .unwrap();
        victim.set(Some(transport.schedule(record(&log), at("0i")).unwrap()));

        transport.start(Some(0.0), None).unwrap();
        transport.process(0.5, &mut draw);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_loop_fires_exactly_four_quarters_per_pass() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();

        transport.set_loop_points(at("0i"), at("1m")).unwrap();
        transport.set_loop_at(true, 0.0).unwrap();
        transport
            .schedule_repeat(record(&log), at("4n"), None, None)
            .unwrap();
        transport.start(Some(0.0), None).unwrap();
        transport.process(4.0, &mut draw);

        assert_times(&log, &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5]);
        assert_eq!(transport.ticks_at_time(2.25), 96);
    }

    #[test]
    fn test_loop_boundary_ordering() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Rc::new(RefCell::new(Vec::new()));

        let tagged = |tag: &'static str| {
            let log = Rc::clone(&log);
            move |_: &mut Dispatch<'_>, time: f64| log.borrow_mut().push((tag, time))
        };

        transport.set_loop_points(at("0i"), at("1m")).unwrap();
        transport.set_loop_at(true, 0.0).unwrap();
        transport
            .schedule_repeat(tagged("bar"), at("1m"), None, None)
            .unwrap();
        transport.schedule(tagged("end"), at("1m")).unwrap();
        transport.schedule(tagged("start"), at("0i")).unwrap();
        transport.start(Some(0.0), None).unwrap();
        transport.process(2.5, &mut draw);

        // the bar repeat matches both loop end and loop start but fires once
        assert_eq!(
            *log.borrow(),
            vec![("bar", 0.0), ("start", 0.0), ("bar", 2.0), ("end", 2.0)]
        );
    }

    #[test]
    fn test_pause_holds_and_stop_rewinds() {
        let (_clock, mut transport, _draw) = transport();

        transport.start(Some(0.0), None).unwrap();
        transport.pause(Some(1.0)).unwrap();
        assert_eq!(transport.ticks_at_time(1.0), 384);
        assert_eq!(transport.ticks_at_time(3.0), 384);
        assert_eq!(transport.state_at(2.0), PlaybackState::Paused);

        transport.start(Some(3.0), None).unwrap();
        assert_eq!(transport.ticks_at_time(3.5), 576);

        transport.stop(Some(4.0)).unwrap();
        assert_eq!(transport.ticks_at_time(4.5), 0);
        assert_eq!(transport.state_at(4.5), PlaybackState::Stopped);
    }

    #[test]
    fn test_pause_between_ticks_fires_each_tick_once() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();
        let every_tick = Rc::new(Cell::new(0_usize));

        transport.schedule(record(&log), at("384i")).unwrap();
        let counter = Rc::clone(&every_tick);
        transport
            .schedule_repeat(
                move |_: &mut Dispatch<'_>, _| counter.set(counter.get() + 1),
                at("1i"),
                None,
                None,
            )
            .unwrap();

        // pause 0.384 of a tick after tick 384
        transport.start(Some(0.0), None).unwrap();
        transport.pause(Some(1.0 + 0.384 / 384.0)).unwrap();
        transport.start(Some(2.0), None).unwrap();
        transport.process(3.0, &mut draw);

        assert_times(&log, &[1.0]);
        // ticks 0..=384 before the pause, 385..=768 after it
        assert_eq!(every_tick.get(), 769);
        assert_eq!(transport.ticks_at_time(3.0), 768);
    }

    #[test]
    fn test_scheduled_event_does_not_refire_after_restart() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();

        transport.schedule(record(&log), at("100i")).unwrap();
        transport.schedule(record(&log), at("1000i")).unwrap();

        transport.start(Some(0.0), None).unwrap();
        transport.process(1.0, &mut draw);
        transport.stop(Some(1.0)).unwrap();
        transport.start(Some(2.0), None).unwrap();
        transport.process(5.0, &mut draw);

        // 100i fired once; 1000i lay beyond the stop and was cancelled
        assert_times(&log, &[100.0 / 384.0]);
        assert_eq!(transport.scheduled_count(), 0);
    }

    #[test]
    fn test_start_with_offset() {
        let (_clock, mut transport, _draw) = transport();
        transport.start(Some(1.0), Some(at("1m"))).unwrap();
        assert_eq!(transport.ticks_at_time(1.0), 768);
        assert_eq!(transport.ticks_at_time(1.5), 960);
    }

    #[test]
    fn test_stop_cancels_pending_one_shots_only() {
        let (_clock, mut transport, _draw) = transport();
        let log = Log::default();

        transport.schedule_once(record(&log), at("2m")).unwrap();
        transport.schedule(record(&log), at("3m")).unwrap();
        transport
            .schedule_repeat(record(&log), at("1m"), None, None)
            .unwrap();

        transport.start(Some(0.0), None).unwrap();
        transport.stop(Some(1.0)).unwrap();
        assert_eq!(transport.scheduled_count(), 1);
    }

    #[test]
    fn test_tempo_ramp_is_linear() {
        let (_clock, mut transport, _draw) = transport();
        transport
            .bpm_mut()
            .linear_ramp_to_value_at_time(240.0, 10.0)
            .unwrap();

        assert_relative_eq!(transport.bpm().value_at(5.0), 180.0, epsilon = 1e-9);
        assert_relative_eq!(transport.bpm().value_at(10.0), 240.0, epsilon = 1e-9);
    }

    #[test]
    fn test_seconds_ticks_round_trip_through_ramp() {
        let (_clock, mut transport, _draw) = transport();
        transport
            .bpm_mut()
            .linear_ramp_to_value_at_time(240.0, 10.0)
            .unwrap();
        transport.set_bpm(90.0, Some(12.0)).unwrap();

        for seconds in [0.0, 0.1, 1.7, 5.3, 9.99, 11.0, 15.25] {
            let ticks = transport.seconds_to_ticks(seconds);
            assert_abs_diff_eq!(
                transport.ticks_to_seconds(ticks),
                seconds,
                epsilon = 1.0 / 48_000.0
            );
        }
    }

    #[test]
    fn test_conversions() {
        let (_clock, transport, _draw) = transport();

        assert_eq!(transport.to_ticks(at("1m")).unwrap(), 768);
        assert_eq!(transport.to_ticks(at("1:2:0")).unwrap(), 1152);
        assert_eq!(transport.to_ticks(at("8t")).unwrap(), 64);
        assert_eq!(transport.to_ticks(at("0.5")).unwrap(), 192);
        assert_relative_eq!(transport.to_seconds(at("4n")).unwrap(), 0.5, epsilon = 1e-12);
        assert_eq!(transport.ticks_to_position(1152).to_string(), "1:2:0");
        assert_eq!(
            transport.position_to_ticks(BarsBeatsSixteenths::new(0, 1, 2.0)),
            288
        );
        assert!(transport.to_ticks(TransportTime::Seconds(-1.0)).is_err());
    }

    #[test]
    fn test_callback_schedules_future_event() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();

        let inner = Rc::clone(&log);
        transport
            .schedule_once(
                move |dispatch: &mut Dispatch<'_>, _| {
                    dispatch
                        .transport
                        .schedule_once(record(&inner), TransportTime::Ticks(384))
                        .unwrap();
                },
                at("4n"),
            )
            .unwrap();

        transport.start(Some(0.0), None).unwrap();
        transport.process(2.0, &mut draw);
        assert_times(&log, &[1.0]);
    }

    #[test]
    fn test_overdue_event_fires_on_next_pass() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();

        transport.start(Some(0.0), None).unwrap();
        transport.process(1.0, &mut draw);

        transport.schedule_once(record(&log), at("4n")).unwrap();
        transport.process(1.2, &mut draw);

        assert_times(&log, &[1.0]);
        transport.process(3.0, &mut draw);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_nested_process_is_refused() {
        let (_clock, mut transport, mut draw) = transport();
        let nested = Rc::new(Cell::new(None));

        let sink = Rc::clone(&nested);
        transport
            .schedule_once(
                move |dispatch: &mut Dispatch<'_>, _| {
                    let invoked = dispatch.transport.process(5.0, &mut *dispatch.draw);
                    sink.set(Some(invoked));
                },
                at("0i"),
            )
            .unwrap();

        transport.start(Some(0.0), None).unwrap();
        assert_eq!(transport.process(0.1, &mut draw), 1);
        assert_eq!(nested.get(), Some(0));
    }

    #[test]
    fn test_callback_queues_draw_work() {
        let (_clock, mut transport, mut draw) = transport();
        transport
            .schedule_once(
                |dispatch: &mut Dispatch<'_>, time| {
                    dispatch.draw.schedule(|_| {}, time).unwrap();
                },
                at("4n"),
            )
            .unwrap();

        transport.start(Some(0.0), None).unwrap();
        transport.process(1.0, &mut draw);
        assert_eq!(draw.len(), 1);
    }

    #[test]
    fn test_swing_delays_off_beat_eighths() {
        let (_clock, mut transport, mut draw) = transport();
        let log = Log::default();

        transport.set_swing(0.5).unwrap();
        transport
            .schedule_repeat(record(&log), at("8n"), None, None)
            .unwrap();
        transport.start(Some(0.0), None).unwrap();
        transport.process(1.01, &mut draw);

        // two thirds of an eighth (64 ticks = 1/6 s) scaled by the swing amount
        let delay = 0.5 / 6.0;
        assert_times(&log, &[0.0, 0.25 + delay, 0.5, 0.75 + delay, 1.0]);
    }

    #[test]
    fn test_lifecycle_notifications() {
        let (_clock, mut transport, mut draw) = transport();
        let kinds = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&kinds);
        transport.on_any(move |event: &TransportEvent| sink.borrow_mut().push(event.kind()));

        transport.set_loop_points(at("0i"), at("1m")).unwrap();
        transport.set_loop_at(true, 0.0).unwrap();
        transport.start(Some(0.0), None).unwrap();
        transport.process(2.5, &mut draw);
        transport.stop(Some(2.5)).unwrap();
        transport.process(3.0, &mut draw);

        assert_eq!(
            *kinds.borrow(),
            vec![
                TransportEventKind::Start,
                TransportEventKind::LoopEnd,
                TransportEventKind::LoopStart,
                TransportEventKind::Loop,
                TransportEventKind::Stop,
            ]
        );
    }

    #[test]
    fn test_position_while_stopped() {
        let (_clock, mut transport, _draw) = transport();

        transport.set_ticks(384).unwrap();
        assert_eq!(transport.ticks(), 384);
        assert_eq!(transport.position(), BarsBeatsSixteenths::new(0, 2, 0.0));

        transport
            .set_position(BarsBeatsSixteenths::new(1, 0, 0.0))
            .unwrap();
        assert_eq!(transport.ticks(), 768);
    }

    #[test]
    fn test_next_subdivision() {
        let (_clock, mut transport, _draw) = transport();
        assert_eq!(transport.next_subdivision(at("4n")), Ok(None));

        transport.start(Some(0.0), None).unwrap();
        let next = transport.next_subdivision(at("4n")).unwrap().unwrap();
        assert_relative_eq!(next, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_progress_through_loop() {
        let (clock, mut transport, _draw) = transport();
        transport.set_loop_points(at("0i"), at("1m")).unwrap();
        transport.set_loop_at(true, 0.0).unwrap();
        transport.start(Some(0.0), None).unwrap();

        clock.set(0.9);
        assert_relative_eq!(transport.progress(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_arguments() {
        let (_clock, mut transport, _draw) = transport();

        assert_eq!(
            transport.set_loop_points(at("2m"), at("1m")),
            Err(TimingError::InvalidLoop {
                start: 1536,
                end: 768
            })
        );
        assert!(transport.set_swing(1.5).is_err());
        assert!(transport.start(Some(-1.0), None).is_err());
        assert!(
            transport
                .schedule_repeat(|_: &mut Dispatch<'_>, _| {}, at("0i"), None, None)
                .is_err()
        );
    }

    #[test]
    fn test_dispose_rejects_further_use() {
        let (_clock, mut transport, mut draw) = transport();
        let id = transport
            .schedule(|_: &mut Dispatch<'_>, _| {}, at("0i"))
            .unwrap();

        transport.dispose();
        assert_eq!(
            transport.start(None, None),
            Err(TimingError::Disposed("transport"))
        );
        assert!(
            transport
                .schedule(|_: &mut Dispatch<'_>, _| {}, at("0i"))
                .is_err()
        );
        assert!(!transport.clear(id));
        assert_eq!(transport.process(1.0, &mut draw), 0);
    }
}
