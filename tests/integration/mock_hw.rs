//! Mock hardware and recording sinks for integration tests.
//!
//! Everything here runs on the host against the in-memory adapters; no
//! radio, I2C bus or UART is touched.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bioinfo::adapters::config_store::MemoryConfigStore;
use bioinfo::ble::{BleEventHandler, Command};
use bioinfo::config::{ConfigError, ConfigPort, SystemConfig};
use bioinfo::lifecycle::{Executor, run_until};
use bioinfo::sensors::dht20;
use embassy_time::{Duration, Timer, with_timeout};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use futures_lite::future::block_on;

// ── Engine event record ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    HandshakeSuccess,
    Disconnect,
    BioinfoUpdated,
    Command(Command, Option<String>),
}

#[derive(Default)]
pub struct RecordingHandler {
    pub events: RefCell<Vec<Event>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.borrow().iter().filter(|e| *e == event).count()
    }

    pub fn commands(&self) -> Vec<(Command, Option<String>)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Command(c, a) => Some((*c, a.clone())),
                _ => None,
            })
            .collect()
    }
}

impl BleEventHandler for RecordingHandler {
    fn on_connect(&self) {
        self.events.borrow_mut().push(Event::Connect);
    }

    fn on_handshake_success(&self) {
        self.events.borrow_mut().push(Event::HandshakeSuccess);
    }

    fn on_disconnect(&self) {
        self.events.borrow_mut().push(Event::Disconnect);
    }

    fn on_bioinfo_data_updated(&self) {
        self.events.borrow_mut().push(Event::BioinfoUpdated);
    }

    fn on_command(&self, command: Command, argument: Option<&str>) {
        self.events
            .borrow_mut()
            .push(Event::Command(command, argument.map(str::to_owned)));
    }
}

// ── DHT20 bus ─────────────────────────────────────────────────

/// I2C bus answering like a calibrated DHT20 that always has `frame`
/// ready.  Clones share the transcript.
#[derive(Clone)]
pub struct MockDht20Bus {
    state: Rc<RefCell<BusState>>,
}

struct BusState {
    status: VecDeque<u8>,
    frame: [u8; dht20::FRAME_LEN],
    triggers: usize,
}

#[allow(dead_code)]
impl MockDht20Bus {
    pub fn new(frame: [u8; dht20::FRAME_LEN]) -> Self {
        Self::with_status(&[dht20::STATUS_CALIBRATED], frame)
    }

    /// Status reads return `status` in order; the last value repeats.
    pub fn with_status(status: &[u8], frame: [u8; dht20::FRAME_LEN]) -> Self {
        Self {
            state: Rc::new(RefCell::new(BusState {
                status: status.iter().copied().collect(),
                frame,
                triggers: 0,
            })),
        }
    }

    pub fn triggers(&self) -> usize {
        self.state.borrow().triggers
    }
}

impl ErrorType for MockDht20Bus {
    type Error = ErrorKind;
}

impl I2c for MockDht20Bus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != dht20::ADDRESS {
            return Err(ErrorKind::Other);
        }
        let mut state = self.state.borrow_mut();
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if bytes[..] == dht20::TRIGGER_COMMAND {
                        state.triggers += 1;
                    }
                }
                Operation::Read(buf) if buf.len() == 1 => {
                    buf[0] = if state.status.len() > 1 {
                        state.status.pop_front().unwrap_or(dht20::STATUS_CALIBRATED)
                    } else {
                        state.status.front().copied().unwrap_or(dht20::STATUS_CALIBRATED)
                    };
                }
                Operation::Read(buf) => {
                    let n = buf.len();
                    buf.copy_from_slice(&state.frame[..n]);
                }
            }
        }
        Ok(())
    }
}

/// 50 % RH, 25 °C.
pub const DHT20_FRAME: [u8; dht20::FRAME_LEN] = [0x1C, 0x80, 0x00, 0x06, 0x00, 0x00];

// ── Config store ──────────────────────────────────────────────

/// Hands the context a store the test can still inspect.
pub struct SharedStore(pub Rc<MemoryConfigStore>);

impl ConfigPort for SharedStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        self.0.load()
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        self.0.save(config)
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Defaults with every wait shortened for host tests.
pub fn fast_config() -> SystemConfig {
    SystemConfig {
        handshake_timeout_ms: 200,
        indicate_timeout_ms: 200,
        update_interval_ms: 20,
        sensor_interval_ms: 10,
        sensor_retry_budget: 3,
        sensor_retry_interval_ms: 5,
        shutdown_timeout_ms: 300,
        ..SystemConfig::default()
    }
}

/// Run the executor for `ms` of wall time.
#[allow(dead_code)]
pub fn settle(executor: &Executor, ms: u64) {
    block_on(run_until(executor, Timer::after(Duration::from_millis(ms))));
}

/// Poll `condition` every 5 ms; panic if it is still false after 2 s.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let polled = with_timeout(Duration::from_secs(2), async {
        while !condition() {
            Timer::after(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}
