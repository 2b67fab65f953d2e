//! State-machine context: owns the engine, the sensor decoders and the
//! installed state, and runs the controller loop that serializes
//! transitions.
//!
//! ```text
//!   states ──request_transition()──▶ pending slot + signal
//!                                          │
//!   Context::run ◀─────────────── wait ────┘
//!       └── swap_to(next): exit → unregister → create/enter → register → sensor policy
//! ```
//!
//! States only see [`ContextShared`]: the pieces they need (transition
//! slot, telemetry snapshot, config, sensor handles) without the engine's
//! GATT type parameter.

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::Context as _;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future::zip;
use log::{debug, error, info, warn};
use serde::Serialize;

use super::{ApplicationState, StateId};
use crate::ble::codec::{self, BIOINFO_LEN};
use crate::ble::engine::{BlePeripheral, EngineSettings};
use crate::ble::GattServer;
use crate::config::{ConfigPort, DeviceName, SystemConfig};
use crate::error::{Error, Result};
use crate::lifecycle::{Executor, ShutdownOutcome};
use crate::sensors::dht20::Dht20Reading;
use crate::sensors::pms7003::Pms7003Reading;
use crate::sensors::ze07co::Ze07CoReading;
use crate::sensors::{Decoder, DecoderSettings, FrameSource, Sample, SensorHandle};

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Combined reading pushed over the Bioinfo characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// °C
    pub temperature: f32,
    /// Relative humidity, 0..1
    pub humidity: f32,
    /// µg/m³, atmospheric
    pub pm2_5: f32,
    /// ppm
    pub co_concentration: f32,
    /// Monotonic seconds of the newest real sample folded in; -1 before any.
    pub last_update: i32,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            temperature: f32::NEG_INFINITY,
            humidity: f32::NEG_INFINITY,
            pm2_5: f32::NEG_INFINITY,
            co_concentration: f32::NEG_INFINITY,
            last_update: -1,
        }
    }
}

impl TelemetrySnapshot {
    /// First field still holding the unset sentinel, in wire order.
    pub fn first_unset(&self) -> Option<&'static str> {
        [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("pm2_5", self.pm2_5),
            ("co_concentration", self.co_concentration),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }

    pub fn is_complete(&self) -> bool {
        self.first_unset().is_none()
    }
}

/// Replace `slot` with `value` if `value` is a real reading.
fn fold(slot: &mut f32, value: f32) {
    if value.is_finite() {
        *slot = value;
    }
}

// ---------------------------------------------------------------------------
// Ports seen by the states
// ---------------------------------------------------------------------------

/// The slice of the BLE engine the application logic drives.
pub trait PeripheralControl {
    /// Store and (if a session is up) notify a Bioinfo value.
    fn publish_bioinfo(&self, payload: &[u8; BIOINFO_LEN]);

    /// Name to advertise from the next advertising round on.
    fn rename(&self, name: DeviceName);

    /// A central is connected and past the handshake.
    fn has_session(&self) -> bool;
}

/// Read/pause handles on the three decoders.
#[derive(Clone)]
pub struct SensorHandles {
    pub dht20: SensorHandle<Dht20Reading>,
    pub pms7003: SensorHandle<Pms7003Reading>,
    pub ze07co: SensorHandle<Ze07CoReading>,
}

impl SensorHandles {
    pub fn pause_all(&self) {
        self.dht20.pause();
        self.pms7003.pause();
        self.ze07co.pause();
    }

    pub fn resume_all(&self) {
        self.dht20.resume();
        self.pms7003.resume();
        self.ze07co.resume();
    }

    pub fn all_paused(&self) -> bool {
        self.dht20.is_paused() && self.pms7003.is_paused() && self.ze07co.is_paused()
    }

    pub fn none_paused(&self) -> bool {
        !self.dht20.is_paused() && !self.pms7003.is_paused() && !self.ze07co.is_paused()
    }
}

/// The three decoders owned by the context.
pub struct Sensors {
    pub dht20: Decoder<Dht20Reading>,
    pub pms7003: Decoder<Pms7003Reading>,
    pub ze07co: Decoder<Ze07CoReading>,
}

impl Sensors {
    pub fn new(settings: DecoderSettings) -> Self {
        Self {
            dht20: Decoder::new("DHT20", settings),
            pms7003: Decoder::new("PMS7003", settings),
            ze07co: Decoder::new("ZE07CO", settings),
        }
    }

    pub fn handles(&self) -> SensorHandles {
        SensorHandles {
            dht20: self.dht20.handle(),
            pms7003: self.pms7003.handle(),
            ze07co: self.ze07co.handle(),
        }
    }
}

/// How each component finished [`Context::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyReport {
    pub engine: ShutdownOutcome,
    pub dht20: ShutdownOutcome,
    pub pms7003: ShutdownOutcome,
    pub ze07co: ShutdownOutcome,
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

pub struct ContextShared {
    pending: Cell<Option<StateId>>,
    transition: Signal<NoopRawMutex, ()>,
    stopped: Cell<bool>,
    snapshot: Cell<TelemetrySnapshot>,
    peripheral: Box<dyn PeripheralControl>,
    sensors: SensorHandles,
    config: RefCell<SystemConfig>,
    config_port: Box<dyn ConfigPort>,
    executor: Rc<Executor>,
}

impl ContextShared {
    /// Write the single pending slot (last request wins) and wake the
    /// controller.  Ignored once the context is stopping.
    pub fn request_transition(&self, next: StateId) {
        if self.stopped.get() {
            debug!("FSM: stopping, transition to {} dropped", next.name());
            return;
        }
        if let Some(previous) = self.pending.replace(Some(next)) {
            debug!(
                "FSM: pending {} overwritten by {}",
                previous.name(),
                next.name()
            );
        }
        self.transition.signal(());
    }

    pub fn pending_transition(&self) -> Option<StateId> {
        self.pending.get()
    }

    /// Fold the latest sensor samples into the snapshot and return a copy.
    pub fn update_bioinfo_data(
        &self,
        dht20: &Sample<Dht20Reading>,
        pms7003: &Sample<Pms7003Reading>,
        ze07co: &Sample<Ze07CoReading>,
    ) -> TelemetrySnapshot {
        let mut snapshot = self.snapshot.get();
        fold(&mut snapshot.temperature, dht20.reading.temperature);
        fold(&mut snapshot.humidity, dht20.reading.humidity);
        if pms7003.reading.is_set() {
            fold(
                &mut snapshot.pm2_5,
                pms7003.reading.concentration_atm.pm2_5 as f32,
            );
        }
        fold(
            &mut snapshot.co_concentration,
            ze07co.reading.concentration_ppm,
        );

        let newest_ms = [
            dht20.reading.is_set().then_some(dht20.timestamp_ms),
            pms7003.reading.is_set().then_some(pms7003.timestamp_ms),
            ze07co.reading.is_set().then_some(ze07co.timestamp_ms),
        ]
        .into_iter()
        .flatten()
        .max();
        if let Some(ms) = newest_ms {
            snapshot.last_update = snapshot.last_update.max((ms / 1000) as i32);
        }
        self.snapshot.set(snapshot);
        snapshot
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.get()
    }

    /// Fold the latest samples and publish the Bioinfo payload.
    ///
    /// Nothing is published while any field is still unset; the first
    /// missing field is reported as [`Error::DataNotReady`].
    pub fn send_data(&self) -> Result<TelemetrySnapshot> {
        let snapshot = self.update_bioinfo_data(
            &self.sensors.dht20.get_latest(),
            &self.sensors.pms7003.get_latest(),
            &self.sensors.ze07co.get_latest(),
        );
        if let Some(field) = snapshot.first_unset() {
            return Err(Error::DataNotReady(field));
        }
        self.peripheral.publish_bioinfo(&codec::encode_bioinfo(&snapshot));
        Ok(snapshot)
    }

    /// Validate, persist, then hand the new name to the engine.
    pub fn update_name(&self, name: &str) -> Result<()> {
        let mut config = self.config.borrow().clone();
        config.set_device_name(name)?;
        self.config_port.save(&config)?;
        let device_name = config.device_name.clone();
        *self.config.borrow_mut() = config;
        info!("FSM: device name saved as '{}'", device_name);
        self.peripheral.rename(device_name);
        Ok(())
    }

    pub fn config(&self) -> SystemConfig {
        self.config.borrow().clone()
    }

    pub fn sensors(&self) -> &SensorHandles {
        &self.sensors
    }

    pub fn has_session(&self) -> bool {
        self.peripheral.has_session()
    }

    pub fn executor(&self) -> &Rc<Executor> {
        &self.executor
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Running tasks (engine, decoders, Data service) keep their owners
/// alive through the executor; a started context is torn down with
/// [`Context::destroy`].  The installed state only reaches the engine
/// through a weak handle, so an unstarted context drops cleanly.
pub struct Context<G: GattServer + 'static> {
    shared: Rc<ContextShared>,
    engine: BlePeripheral<G>,
    sensors: Sensors,
    current: RefCell<Option<Rc<ApplicationState>>>,
}

impl<G: GattServer + 'static> Context<G> {
    /// Load configuration through `config_port` (defaults if unreadable)
    /// and build the engine and decoders.  Nothing runs until
    /// [`Context::start`].
    pub fn new(gatt: G, config_port: Box<dyn ConfigPort>, executor: Rc<Executor>) -> Self {
        let config = config_port.load().unwrap_or_else(|e| {
            warn!("FSM: config unavailable ({}), using defaults", e);
            SystemConfig::default()
        });
        let engine = BlePeripheral::new(
            gatt,
            config.device_name.clone(),
            EngineSettings::from_config(&config),
            executor.clone(),
        );
        let sensors = Sensors::new(DecoderSettings::from_config(&config));
        let shared = Rc::new(ContextShared {
            pending: Cell::new(None),
            transition: Signal::new(),
            stopped: Cell::new(false),
            snapshot: Cell::new(TelemetrySnapshot::default()),
            peripheral: Box::new(engine.downgrade()),
            sensors: sensors.handles(),
            config: RefCell::new(config),
            config_port,
            executor,
        });
        Self {
            shared,
            engine,
            sensors,
            current: RefCell::new(None),
        }
    }

    /// Initialise the three transports and spawn their decode tasks.
    /// Returns `true` only if all three started; a failed sensor is
    /// logged and stays unset.
    pub async fn start_sensors<D, P, Z>(&self, dht20: D, pms7003: P, ze07co: Z) -> bool
    where
        D: FrameSource<Reading = Dht20Reading> + 'static,
        P: FrameSource<Reading = Pms7003Reading> + 'static,
        Z: FrameSource<Reading = Ze07CoReading> + 'static,
    {
        let executor = self.shared.executor.clone();
        let mut all = self.sensors.dht20.start(dht20, &executor).await;
        all &= self.sensors.pms7003.start(pms7003, &executor).await;
        all &= self.sensors.ze07co.start(ze07co, &executor).await;
        if !all {
            warn!("FSM: not every sensor started");
        }
        all
    }

    /// Install Advertising and start the engine.  Idempotent.
    pub fn start(&self) {
        if self.current.borrow().is_none() {
            self.install(StateId::Advertising);
        }
        self.engine.start();
    }

    /// Controller loop: serialize transitions until [`Context::stop`].
    ///
    /// An invalid transition is fatal: everything is destroyed and the
    /// error is returned.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("FSM: controller running");
        loop {
            self.shared.transition.wait().await;
            if self.shared.stopped.get() {
                break;
            }
            let Some(next) = self.shared.pending.take() else {
                continue;
            };
            if let Err(e) = self.swap_to(next) {
                error!("FSM: {}, tearing down", e);
                self.destroy().await;
                return Err(e).context("state machine controller failed");
            }
        }
        info!("FSM: controller stopped");
        Ok(())
    }

    fn swap_to(&self, requested: StateId) -> Result<()> {
        let current = self.current_state();
        let mut next = requested;
        if next == StateId::Data && !self.shared.has_session() {
            info!("FSM: no authenticated session, Data redirected to Advertising");
            next = StateId::Advertising;
        }
        if current == Some(next) {
            debug!("FSM: already in {}", next.name());
            return Ok(());
        }
        if let Some(from) = current {
            if !from.can_transition_to(next) {
                return Err(Error::InvalidTransition { from, to: next });
            }
            info!("FSM: {} -> {}", from.name(), next.name());
        }
        self.install(next);
        Ok(())
    }

    fn install(&self, next: StateId) {
        if let Some(old) = self.current.borrow_mut().take() {
            old.exit();
        }
        self.engine.clear_event_handler();

        let state = Rc::new(ApplicationState::create(next, &self.shared));
        state.enter();
        self.engine.set_event_handler(state.clone());
        *self.current.borrow_mut() = Some(state);

        if next.sensors_active() {
            self.shared.sensors.resume_all();
        } else {
            self.shared.sensors.pause_all();
        }
    }

    /// Wake and end the controller loop, then exit the installed state.
    pub fn stop(&self) {
        self.shared.stopped.set(true);
        self.shared.pending.set(None);
        self.shared.transition.signal(());
        if let Some(state) = self.current.borrow_mut().take() {
            state.exit();
            info!("FSM: {} exited on stop", state.id().name());
        }
        self.engine.clear_event_handler();
    }

    /// [`Context::stop`], then bounded shutdown of the engine and each
    /// decoder, all in parallel.
    pub async fn destroy(&self) -> DestroyReport {
        self.stop();
        let (engine, (dht20, (pms7003, ze07co))) = zip(
            self.engine.destroy(),
            zip(
                self.sensors.dht20.destroy(),
                zip(self.sensors.pms7003.destroy(), self.sensors.ze07co.destroy()),
            ),
        )
        .await;
        let report = DestroyReport {
            engine,
            dht20,
            pms7003,
            ze07co,
        };
        info!("FSM: destroyed {:?}", report);
        report
    }

    pub fn current_state(&self) -> Option<StateId> {
        self.current.borrow().as_ref().map(|s| s.id())
    }

    /// Task count of the installed state (only Data owns any).
    pub fn state_task_count(&self) -> usize {
        match self.current.borrow().as_deref() {
            Some(ApplicationState::Data(data)) => data.task_count(),
            _ => 0,
        }
    }

    pub fn request_transition(&self, next: StateId) {
        self.shared.request_transition(next);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.shared.snapshot()
    }

    pub fn send_data(&self) -> Result<TelemetrySnapshot> {
        self.shared.send_data()
    }

    pub fn update_name(&self, name: &str) -> Result<()> {
        self.shared.update_name(name)
    }

    pub fn shared(&self) -> &Rc<ContextShared> {
        &self.shared
    }

    pub fn engine(&self) -> &BlePeripheral<G> {
        &self.engine
    }

    pub fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    pub fn config(&self) -> SystemConfig {
        self.shared.config()
    }
}
