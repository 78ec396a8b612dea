// src/context.rs
//
// Host clock access and the object that owns a transport and its draw queue.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use log::{debug, warn};

use crate::draw::Draw;
use crate::error::{TimingError, TimingResult, check_positive, check_time};
use crate::transport::{Transport, TransportConfig};

// Default timing configuration
const DEFAULT_LOOK_AHEAD: f64 = 0.1;
const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

// ═══════════════════════════════════════════════════════════════════════════
// Host clocks
// ═══════════════════════════════════════════════════════════════════════════

/// Monotonic time source of the host audio system, in seconds.
pub trait HostClock {
    fn now(&self) -> f64;
}

/// Wall clock measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Settable clock for offline rendering and tests.
///
/// Clones share the same time, so a test can keep one copy and hand
/// another to a [`Context`].
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, time: f64) {
        self.time.set(time);
    }

    pub fn advance(&self, seconds: f64) {
        self.time.set(self.time.get() + seconds);
    }
}

impl HostClock for ManualClock {
    fn now(&self) -> f64 {
        self.time.get()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration for creating a context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextConfig {
    /// Seconds the scheduler works ahead of the host clock.
    pub look_ahead: f64,
    /// Sample rate in Hz (e.g., 44100.0, 48000.0).
    pub sample_rate: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            look_ahead: DEFAULT_LOOK_AHEAD,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════

/// Cheap, cloneable view of the host clock plus lookahead.
#[derive(Clone)]
pub struct ContextHandle {
    clock: Rc<dyn HostClock>,
    look_ahead: f64,
    sample_rate: f64,
}

impl ContextHandle {
    pub fn new(clock: Rc<dyn HostClock>, config: ContextConfig) -> TimingResult<Self> {
        check_time(config.look_ahead)?;
        check_positive("sample rate", config.sample_rate)?;
        Ok(Self {
            clock,
            look_ahead: config.look_ahead,
            sample_rate: config.sample_rate,
        })
    }

    /// Scheduling time: host time plus lookahead.
    #[inline]
    pub fn now(&self) -> f64 {
        self.clock.now() + self.look_ahead
    }

    /// Host time without lookahead.
    #[inline]
    pub fn immediate(&self) -> f64 {
        self.clock.now()
    }

    #[inline]
    pub fn look_ahead(&self) -> f64 {
        self.look_ahead
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Duration of one sample in seconds.
    #[inline]
    pub fn sample_time(&self) -> f64 {
        1.0 / self.sample_rate
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("now", &self.immediate())
            .field("look_ahead", &self.look_ahead)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Context
// ═══════════════════════════════════════════════════════════════════════════

/// Owns the transport and draw queue of one audio context.
///
/// The host calls [`Context::process`] once per processing quantum and
/// [`Context::draw_frame`] once per animation frame.
#[derive(Debug)]
pub struct Context {
    handle: ContextHandle,
    transport: Transport,
    draw: Draw,

    /// End of the last processed window.
    last_until: f64,
    disposed: bool,
}

impl Context {
    pub fn new(clock: Rc<dyn HostClock>, config: ContextConfig) -> TimingResult<Self> {
        Self::with_transport_config(clock, config, TransportConfig::default())
    }

    pub fn with_transport_config(
        clock: Rc<dyn HostClock>,
        config: ContextConfig,
        transport: TransportConfig,
    ) -> TimingResult<Self> {
        let handle = ContextHandle::new(clock, config)?;
        let transport = Transport::new(handle.clone(), transport)?;
        debug!(
            "context created (look_ahead {:.3}s, sample_rate {})",
            handle.look_ahead(),
            handle.sample_rate()
        );
        Ok(Self {
            handle,
            transport,
            draw: Draw::new(),
            last_until: 0.0,
            disposed: false,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    #[inline]
    pub fn now(&self) -> f64 {
        self.handle.now()
    }

    #[inline]
    pub fn immediate(&self) -> f64 {
        self.handle.immediate()
    }

    #[inline]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    #[inline]
    pub fn draw(&self) -> &Draw {
        &self.draw
    }

    #[inline]
    pub fn draw_mut(&mut self) -> &mut Draw {
        &mut self.draw
    }

    // -------------------------------
    // MARK: Host entry points
    // -------------------------------

    /// Advance the transport through `now()`. Returns callbacks invoked.
    pub fn process(&mut self) -> TimingResult<usize> {
        self.ensure_live()?;

        let host = self.handle.immediate();
        if host > self.last_until {
            warn!(
                "processing pass is late: host at {host:.4}s, scheduled through {:.4}s",
                self.last_until
            );
        }

        let until = self.handle.now();
        let fired = self.transport.process(until, &mut self.draw);
        self.last_until = self.last_until.max(until);
        Ok(fired)
    }

    /// Run the draw callbacks due at the current host time.
    pub fn draw_frame(&mut self) -> TimingResult<usize> {
        self.ensure_live()?;
        Ok(self.draw.process(self.handle.immediate()))
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.transport.dispose();
        self.draw.dispose();
        self.disposed = true;
        debug!("context disposed");
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> TimingResult<()> {
        if self.disposed {
            Err(TimingError::Disposed("context"))
        } else {
            Ok(())
        }
    }
}
