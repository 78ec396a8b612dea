// src/event.rs

use std::fmt;

use crate::transport::Dispatch;

/// Identifier returned by every scheduling call.
///
/// Ids are unique per transport and strictly increasing, so sorting by id
/// is sorting by registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub(crate) u64);

impl EventId {
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport callback: receives the dispatch scope and the precise
/// scheduled time in seconds (not "now").
pub type EventCallback = Box<dyn FnMut(&mut Dispatch<'_>, f64)>;

/// When a scheduled event fires, in transport ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Fires the first time the playhead reaches `tick`, then is removed.
    Once { tick: u64 },

    /// Fires at `start + n * interval` for every `n`, until `end` (exclusive).
    Repeat {
        start: u64,
        interval: u64,
        end: Option<u64>,
    },
}

impl Recurrence {
    /// Whether this recurrence has a boundary at `tick`.
    pub fn occurs_at(&self, tick: u64) -> bool {
        match *self {
            Recurrence::Once { tick: at } => at == tick,
            Recurrence::Repeat {
                start,
                interval,
                end,
            } => {
                tick >= start
                    && end.is_none_or(|end| tick < end)
                    && (tick - start) % interval.max(1) == 0
            }
        }
    }

    /// The single tick of a one-shot event.
    #[inline]
    pub fn tick(&self) -> Option<u64> {
        match *self {
            Recurrence::Once { tick } => Some(tick),
            Recurrence::Repeat { .. } => None,
        }
    }

    /// First tick the event can fire at.
    #[inline]
    pub fn start(&self) -> u64 {
        match *self {
            Recurrence::Once { tick } => tick,
            Recurrence::Repeat { start, .. } => start,
        }
    }

    #[inline]
    pub fn is_repeat(&self) -> bool {
        matches!(self, Recurrence::Repeat { .. })
    }
}

/// A registered callback and its recurrence.
///
/// This struct:
/// - is owned exclusively by the event store
/// - lends its callback out while it runs (`is_active` is false meanwhile)
pub struct ScheduledEvent {
    pub(crate) id: EventId,
    pub(crate) recurrence: Recurrence,
    pub(crate) callback: Option<EventCallback>,
}

impl ScheduledEvent {
    pub(crate) fn new(id: EventId, recurrence: Recurrence, callback: EventCallback) -> Self {
        Self {
            id,
            recurrence,
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[inline]
    pub fn recurrence(&self) -> Recurrence {
        self.recurrence
    }

    /// False while the callback is executing.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("id", &self.id)
            .field("recurrence", &self.recurrence)
            .field("active", &self.is_active())
            .finish()
    }
}
