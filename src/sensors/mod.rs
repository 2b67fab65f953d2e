//! Telemetry decoders.
//!
//! One generic lifecycle, three frame strategies:
//!
//! ```text
//!   Decoder<R>  (start / pause / resume / get_latest / destroy)
//!     │ owns one "decode" task running decode_loop(source)
//!     ▼
//!   FrameSource ── Dht20<I2C>                       (I2C, trigger + poll)
//!              └─ UartFrameSource<Pms7003, Port>    (32-byte frames)
//!              └─ UartFrameSource<Ze07Co, Port>     (9-byte frames)
//! ```
//!
//! The decode task is the only writer of the published [`Sample`];
//! readers get copies through [`SensorHandle`].

pub mod dht20;
pub mod pms7003;
pub mod transport;
pub mod ze07co;

use core::cell::Cell;
use std::rc::Rc;

use embassy_time::{Duration, Instant, Timer, with_timeout};
use log::{debug, error, info, warn};

use crate::config::SystemConfig;
use crate::error::SensorError;
use crate::lifecycle::{Executor, Lifecycle, ShutdownOutcome, StopFlag};

const TASK_DECODE: &str = "decode";

/// Upper bound on transport initialisation inside [`Decoder::start`].
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

// ───────────────────────────────────────────────────────────────
// Frame strategy
// ───────────────────────────────────────────────────────────────

/// Sensor-specific transport handling and frame decoding.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    type Reading: Copy;

    /// Bring the transport up; may issue an initialisation command.
    async fn init(&mut self) -> Result<(), SensorError>;

    /// Read and validate exactly one frame.
    async fn acquire(&mut self) -> Result<Self::Reading, SensorError>;

    /// Discard buffered input and re-initialise.
    async fn resync(&mut self) -> Result<(), SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Published state
// ───────────────────────────────────────────────────────────────

/// A reading plus the monotonic time it was published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<R> {
    pub reading: R,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames decoded and published.
    pub frames: u32,
    /// Frames discarded (marker, checksum, short read).
    pub rejected: u32,
    /// Flush + re-init cycles.
    pub resyncs: u32,
}

struct Shared<R> {
    latest: Cell<Sample<R>>,
    paused: Cell<bool>,
    stats: Cell<DecoderStats>,
}

impl<R: Copy> Shared<R> {
    fn publish(&self, reading: R) {
        self.latest.set(Sample {
            reading,
            timestamp_ms: Instant::now().as_millis(),
        });
        self.bump(|s| s.frames += 1);
    }

    fn bump(&self, f: impl FnOnce(&mut DecoderStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

/// Read/pause handle on a decoder.  Clones share the decoder's state.
pub struct SensorHandle<R> {
    shared: Rc<Shared<R>>,
}

impl<R> Clone for SensorHandle<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Copy> SensorHandle<R> {
    /// Copy of the latest published sample.
    pub fn get_latest(&self) -> Sample<R> {
        self.shared.latest.get()
    }

    pub fn pause(&self) {
        self.shared.paused.set(true);
    }

    pub fn resume(&self) {
        self.shared.paused.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.get()
    }

    pub fn stats(&self) -> DecoderStats {
        self.shared.stats.get()
    }
}

// ───────────────────────────────────────────────────────────────
// Decoder
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DecoderSettings {
    /// Paused-cycle sleep and back-off after bus errors.
    pub interval: Duration,
    pub init_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl DecoderSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            interval: config.sensor_interval(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

pub struct Decoder<R> {
    name: &'static str,
    settings: DecoderSettings,
    shared: Rc<Shared<R>>,
    lifecycle: Lifecycle,
}

impl<R: Copy + Default + 'static> Decoder<R> {
    /// New decoder publishing `R::default()` (the unset sentinel) until
    /// the first frame decodes.
    pub fn new(name: &'static str, settings: DecoderSettings) -> Self {
        Self {
            name,
            settings,
            shared: Rc::new(Shared {
                latest: Cell::new(Sample {
                    reading: R::default(),
                    timestamp_ms: Instant::now().as_millis(),
                }),
                paused: Cell::new(false),
                stats: Cell::new(DecoderStats::default()),
            }),
            lifecycle: Lifecycle::new(name),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Initialise `source` and spawn the decode task.  Returns `false`
    /// if initialisation fails or times out; nothing is spawned then.
    pub async fn start<S>(&self, mut source: S, executor: &Executor) -> bool
    where
        S: FrameSource<Reading = R> + 'static,
    {
        if self.lifecycle.is_running(TASK_DECODE) {
            return true;
        }
        match with_timeout(self.settings.init_timeout, source.init()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{}: initialisation failed: {}", self.name, e);
                return false;
            }
            Err(_) => {
                error!("{}: {}", self.name, SensorError::InitTimeout);
                return false;
            }
        }
        let spawned = self.lifecycle.spawn(
            executor,
            TASK_DECODE,
            decode_loop(
                self.name,
                source,
                self.shared.clone(),
                self.lifecycle.stop_flag(),
                self.settings.interval,
            ),
        );
        if spawned {
            info!("{}: started", self.name);
        }
        spawned
    }

    pub fn handle(&self) -> SensorHandle<R> {
        SensorHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn get_latest(&self) -> Sample<R> {
        self.shared.latest.get()
    }

    pub fn pause(&self) {
        self.shared.paused.set(true);
    }

    pub fn resume(&self) {
        self.shared.paused.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.get()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running(TASK_DECODE)
    }

    pub fn stats(&self) -> DecoderStats {
        self.shared.stats.get()
    }

    pub async fn destroy(&self) -> ShutdownOutcome {
        let outcome = self.lifecycle.shutdown(self.settings.shutdown_timeout).await;
        info!("{}: destroyed ({:?})", self.name, outcome);
        outcome
    }
}

async fn decode_loop<S: FrameSource>(
    name: &'static str,
    mut source: S,
    shared: Rc<Shared<S::Reading>>,
    stop: StopFlag,
    interval: Duration,
) {
    while !stop.is_set() {
        if shared.paused.get() {
            stop.guard(Timer::after(interval)).await;
            continue;
        }
        let Some(result) = stop.guard(source.acquire()).await else {
            break;
        };
        match result {
            Ok(reading) => shared.publish(reading),
            Err(e) if e.needs_resync() => {
                if e != SensorError::NoData {
                    shared.bump(|s| s.rejected += 1);
                }
                warn!("{}: {}, resyncing", name, e);
                shared.bump(|s| s.resyncs += 1);
                if let Some(Err(e)) = stop.guard(source.resync()).await {
                    warn!("{}: resync failed: {}", name, e);
                }
            }
            Err(e) => {
                warn!("{}: {}", name, e);
                stop.guard(Timer::after(interval)).await;
            }
        }
    }
    debug!("{}: decode loop stopped", name);
}
