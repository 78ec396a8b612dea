// src/emitter.rs
//
// Lifecycle notifications published by the transport.

use std::fmt;

/// Something that happened to the transport, with the precise time it
/// takes effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    /// Playback started; `offset` is the position in seconds.
    Start { time: f64, offset: f64 },

    Stop { time: f64 },

    Pause { time: f64 },

    /// The playhead wrapped from loop end to loop start.
    Loop { time: f64 },

    /// Playback (re)entered the loop at its start; `offset` in seconds.
    LoopStart { time: f64, offset: f64 },

    LoopEnd { time: f64 },
}

/// Discriminant of [`TransportEvent`], used to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    Start,
    Stop,
    Pause,
    Loop,
    LoopStart,
    LoopEnd,
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Start { .. } => TransportEventKind::Start,
            TransportEvent::Stop { .. } => TransportEventKind::Stop,
            TransportEvent::Pause { .. } => TransportEventKind::Pause,
            TransportEvent::Loop { .. } => TransportEventKind::Loop,
            TransportEvent::LoopStart { .. } => TransportEventKind::LoopStart,
            TransportEvent::LoopEnd { .. } => TransportEventKind::LoopEnd,
        }
    }

    pub fn time(&self) -> f64 {
        match *self {
            TransportEvent::Start { time, .. }
            | TransportEvent::Stop { time }
            | TransportEvent::Pause { time }
            | TransportEvent::Loop { time }
            | TransportEvent::LoopStart { time, .. }
            | TransportEvent::LoopEnd { time } => time,
        }
    }
}

impl fmt::Display for TransportEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportEventKind::Start => "start",
            TransportEventKind::Stop => "stop",
            TransportEventKind::Pause => "pause",
            TransportEventKind::Loop => "loop",
            TransportEventKind::LoopStart => "loopStart",
            TransportEventKind::LoopEnd => "loopEnd",
        };
        f.write_str(name)
    }
}

/// Handle returned by [`Emitter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&TransportEvent)>;

struct Subscription {
    id: ListenerId,
    /// `None` receives every kind.
    kind: Option<TransportEventKind>,
    listener: Listener,
}

/// Listener registry. Listeners run in subscription order.
#[derive(Default)]
pub struct Emitter {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event.
    pub fn on<F>(&mut self, kind: TransportEventKind, listener: F) -> ListenerId
    where
        F: FnMut(&TransportEvent) + 'static,
    {
        self.subscribe(Some(kind), Box::new(listener))
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&TransportEvent) + 'static,
    {
        self.subscribe(None, Box::new(listener))
    }

    fn subscribe(&mut self, kind: Option<TransportEventKind>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, kind, listener });
        id
    }

    /// Unsubscribe. Unknown ids are ignored.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn emit(&mut self, event: &TransportEvent) {
        let kind = event.kind();
        for subscription in &mut self.subscriptions {
            if subscription.kind.is_none_or(|k| k == kind) {
                (subscription.listener)(event);
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.subscriptions.len())
            .finish()
    }
}
