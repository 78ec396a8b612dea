// src/draw.rs
//
// Low-priority queue for visual/UI work.
//
// Audio callbacks run ahead of time by the lookahead. Work that must line
// up with what the listener hears is deferred here and polled once per
// animation frame against the un-shifted host time.

use std::fmt;

use log::debug;

use crate::error::{TimingError, TimingResult, check_time};
use crate::timeline::{Timed, Timeline};

const DEFAULT_EXPIRATION: f64 = 0.25;
const DEFAULT_ANTICIPATION: f64 = 0.008;

/// Handle returned by [`Draw::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DrawId(u64);

type DrawCallback = Box<dyn FnMut(f64)>;

struct DrawEvent {
    time: f64,
    id: DrawId,
    callback: DrawCallback,
}

impl Timed for DrawEvent {
    #[inline]
    fn time(&self) -> f64 {
        self.time
    }
}

/// Callback queue keyed by absolute time, best effort only.
pub struct Draw {
    events: Timeline<DrawEvent>,
    next_id: u64,

    /// Callbacks later than this many seconds are dropped.
    expiration: f64,

    /// Callbacks run this many seconds early to land on the right frame.
    anticipation: f64,

    disposed: bool,
}

impl Default for Draw {
    fn default() -> Self {
        Self::new()
    }
}

impl Draw {
    pub fn new() -> Self {
        Self {
            events: Timeline::new(),
            next_id: 0,
            expiration: DEFAULT_EXPIRATION,
            anticipation: DEFAULT_ANTICIPATION,
            disposed: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn expiration(&self) -> f64 {
        self.expiration
    }

    pub fn set_expiration(&mut self, seconds: f64) -> TimingResult<()> {
        self.expiration = check_time(seconds)?;
        Ok(())
    }

    #[inline]
    pub fn anticipation(&self) -> f64 {
        self.anticipation
    }

    pub fn set_anticipation(&mut self, seconds: f64) -> TimingResult<()> {
        self.anticipation = check_time(seconds)?;
        Ok(())
    }

    /// Run `callback` at host time `time`. Callbacks at equal times run in
    /// registration order.
    pub fn schedule<F>(&mut self, callback: F, time: f64) -> TimingResult<DrawId>
    where
        F: FnMut(f64) + 'static,
    {
        if self.disposed {
            return Err(TimingError::Disposed("draw"));
        }
        let time = check_time(time)?;

        let id = DrawId(self.next_id);
        self.next_id += 1;
        self.events.add(DrawEvent {
            time,
            id,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    /// Remove one callback. Unknown ids are ignored.
    pub fn clear(&mut self, id: DrawId) -> bool {
        self.events.remove_first(|event| event.id == id).is_some()
    }

    /// Remove every callback at or after `after`.
    pub fn cancel(&mut self, after: f64) {
        self.events.cancel(after);
    }

    /// Run every callback due at host time `now`. Returns how many ran.
    pub fn process(&mut self, now: f64) -> usize {
        let mut ran = 0;

        while self
            .events
            .peek()
            .is_some_and(|event| event.time - self.anticipation <= now)
        {
            let Some(mut event) = self.events.shift() else {
                break;
            };

            let late = now - event.time;
            if late > self.expiration {
                debug!(
                    "draw callback {:?} dropped, {late:.3}s late (expiration {:.3}s)",
                    event.id, self.expiration
                );
                continue;
            }

            (event.callback)(event.time);
            ran += 1;
        }
        ran
    }

    pub fn dispose(&mut self) {
        self.events.clear();
        self.disposed = true;
    }
}

impl fmt::Debug for Draw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draw")
            .field("pending", &self.events.len())
            .field("expiration", &self.expiration)
            .field("anticipation", &self.anticipation)
            .field("disposed", &self.disposed)
            .finish()
    }
}
