// src/scheduler.rs
//
// Storage for transport events.
//
// Dispatch never iterates the store directly. It snapshots the ids due at
// a tick, then borrows each callback out by id, so callbacks can add or
// clear events (including themselves) while the snapshot is walked.

use std::collections::HashMap;

use crate::event::{EventCallback, EventId, Recurrence, ScheduledEvent};
use crate::timeline::{Timed, Timeline};

/// Index entry for one-shot events.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TickEntry {
    tick: u64,
    id: EventId,
}

impl Timed for TickEntry {
    #[inline]
    fn time(&self) -> f64 {
        self.tick as f64
    }
}

/// Sorted arena of scheduled events with logical deletion.
///
/// This struct:
/// - owns every event and its callback
/// - keeps one-shot events on a tick-sorted [`Timeline`]
/// - keeps repeating events in registration order
/// - leaves removed entries in the index until enough pile up to compact
#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<EventId, ScheduledEvent>,

    /// One-shot events by tick. May contain stale ids.
    one_shots: Timeline<TickEntry>,
    stale: usize,

    repeats: Vec<EventId>,

    /// One-shots scheduled behind the processed position.
    overdue: Vec<EventId>,

    next_id: u64,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
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
    pub fn contains(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    pub fn get(&self, id: EventId) -> Option<&ScheduledEvent> {
        self.events.get(&id)
    }

    // -------------------------------
    // MARK: Registration
    // -------------------------------

    pub fn insert(&mut self, recurrence: Recurrence, callback: EventCallback) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;

        match recurrence.tick() {
            Some(tick) => {
                self.one_shots.add(TickEntry { tick, id });
            }
            None => self.repeats.push(id),
        }
        self.events
            .insert(id, ScheduledEvent::new(id, recurrence, callback));
        id
    }

    /// Remove an event. Unknown ids are ignored.
    pub fn remove(&mut self, id: EventId) -> bool {
        let Some(event) = self.events.remove(&id) else {
            return false;
        };

        if event.recurrence.is_repeat() {
            self.repeats.retain(|other| *other != id);
        } else {
            self.mark_stale();
        }
        self.overdue.retain(|other| *other != id);
        true
    }

    /// Remove events whose first tick is at or after `tick`.
    ///
    /// Repeats are only affected when `include_repeats` is set.
    pub fn cancel_from(&mut self, tick: u64, include_repeats: bool) -> usize {
        let doomed: Vec<EventId> = self
            .events
            .values()
            .filter(|event| include_repeats || !event.recurrence.is_repeat())
            .filter(|event| event.recurrence.start() >= tick)
            .map(|event| event.id)
            .collect();

        for id in &doomed {
            self.remove(*id);
        }
        doomed.len()
    }

    pub fn clear_all(&mut self) {
        self.events.clear();
        self.one_shots.clear();
        self.stale = 0;
        self.repeats.clear();
        self.overdue.clear();
    }

    fn mark_stale(&mut self) {
        self.stale += 1;
        if self.stale * 2 > self.one_shots.len() {
            let events = &self.events;
            self.one_shots.retain(|entry| events.contains_key(&entry.id));
            self.stale = 0;
        }
    }

    // -------------------------------
    // MARK: Dispatch support
    // -------------------------------

    /// Ids of every event with a boundary at `tick`, in registration order.
    pub fn collect_due(&self, tick: u64, out: &mut Vec<EventId>) {
        out.clear();

        out.extend(
            self.one_shots
                .iter_at(tick as f64)
                .map(|entry| entry.id)
                .filter(|id| self.events.contains_key(id)),
        );
        out.extend(self.repeats.iter().copied().filter(|id| {
            self.events
                .get(id)
                .is_some_and(|event| event.recurrence.occurs_at(tick))
        }));

        out.sort_unstable();
        out.dedup();
    }

    /// Lend out the callback of a live, idle event.
    pub fn take_callback(&mut self, id: EventId) -> Option<EventCallback> {
        self.events.get_mut(&id)?.callback.take()
    }

    /// Return a lent callback after it ran.
    ///
    /// One-shot events are retired here. If the event was cleared while
    /// its callback ran, the callback is dropped.
    pub fn restore_callback(&mut self, id: EventId, callback: EventCallback) {
        let retire = match self.events.get_mut(&id) {
            Some(event) if matches!(event.recurrence, Recurrence::Once { .. }) => true,
            Some(event) => {
                event.callback = Some(callback);
                false
            }
            None => false,
        };

        if retire {
            self.remove(id);
        }
    }

    // -------------------------------
    // MARK: Overdue events
    // -------------------------------

    pub fn mark_overdue(&mut self, id: EventId) {
        if self.events.contains_key(&id) && !self.overdue.contains(&id) {
            self.overdue.push(id);
        }
    }

    #[inline]
    pub fn has_overdue(&self) -> bool {
        !self.overdue.is_empty()
    }

    pub fn take_overdue(&mut self) -> Vec<EventId> {
        std::mem::take(&mut self.overdue)
    }

    pub fn clear_overdue(&mut self) {
        self.overdue.clear();
    }
}
