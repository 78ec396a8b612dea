// src/lib.rs
//
// Musical timing core: tick clocks, a tempo-aware transport, and
// callback scheduling ahead of an audio host clock.

mod error;
mod scheduler;

pub mod clock;
pub mod context;
pub mod draw;
pub mod emitter;
pub mod event;
pub mod pattern;
pub mod state_timeline;
pub mod tick_param;
pub mod tick_source;
pub mod time;
pub mod timeline;
pub mod transport;

// Re-export key types
pub use clock::{Clock, ClockEvent};
pub use context::{Context, ContextConfig, ContextHandle, HostClock, ManualClock, SystemClock};
pub use draw::{Draw, DrawId};
pub use emitter::{ListenerId, TransportEvent, TransportEventKind};
pub use error::{TimeParseError, TimingError, TimingResult};
pub use event::EventId;
pub use pattern::{Pattern, PatternGenerator, PatternKind};
pub use state_timeline::PlaybackState;
pub use tick_param::{Ramp, TickParam};
pub use time::{BarsBeatsSixteenths, Notation, NoteKind, TimeSignature, TransportTime};
pub use transport::{Dispatch, Transport, TransportConfig};
