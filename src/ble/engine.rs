//! BLE peripheral engine.
//!
//! Three tasks, all owned by one [`Lifecycle`]:
//!
//! ```text
//!  advertise ──▶ connect ──▶ handshake ──ok──▶ spawn "requests" ──▶ wait disconnect ─┐
//!      ▲                        │                                                      │
//!      │                       fail ──▶ force disconnect ───────────────────────────┐ │
//!      │                                                                            ▼ ▼
//!      └──────────── clear connection ◀── cancel "requests" ◀── on_disconnect ◀─────────
//!
//!  "machine-time": write uptime seconds every 1 s, connected or not
//!  "requests":     written(Request) → parse → indicate OK/BAD → on_command
//! ```
//!
//! Events go synchronously to the one registered [`BleEventHandler`].

use core::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use embassy_time::{Duration, Instant, Timer, with_timeout};
use log::{debug, info, warn};

use super::codec::{self, BAD_RESPONSE, BIOINFO_LEN, OK_RESPONSE};
use super::handshake::{self, HandshakeTimeouts};
use super::{
    ADV_APPEARANCE_GENERIC_THERMOMETER, ADV_INTERVAL_US, AdvertiseParams, BleEventHandler,
    Characteristic, ConnHandle, GattServer,
};
use crate::config::{DeviceName, SystemConfig};
use crate::error::BleError;
use crate::fsm::context::PeripheralControl;
use crate::lifecycle::{Executor, Lifecycle, ShutdownOutcome};

const TASK_ADVERTISE: &str = "advertise";
const TASK_MACHINE_TIME: &str = "machine-time";
const TASK_REQUESTS: &str = "requests";

const MACHINE_TIME_PERIOD: Duration = Duration::from_secs(1);
/// Pause after a failed Request read or advertising error so the loop yields.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub appearance: u16,
    pub adv_interval_us: u32,
    pub handshake: HandshakeTimeouts,
    pub shutdown_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            appearance: ADV_APPEARANCE_GENERIC_THERMOMETER,
            adv_interval_us: ADV_INTERVAL_US,
            handshake: HandshakeTimeouts {
                greeting: config.handshake_timeout(),
                ack: config.indicate_timeout(),
            },
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Cheap-to-clone handle on the engine; clones share all state.
pub struct BlePeripheral<G: GattServer + 'static> {
    inner: Rc<Inner<G>>,
}

impl<G: GattServer + 'static> Clone for BlePeripheral<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<G> {
    gatt: G,
    settings: EngineSettings,
    executor: Rc<Executor>,
    device_name: RefCell<DeviceName>,
    connection: Cell<Option<ConnHandle>>,
    authenticated: Cell<bool>,
    handler: RefCell<Option<Rc<dyn BleEventHandler>>>,
    lifecycle: Lifecycle,
}

impl<G: GattServer + 'static> BlePeripheral<G> {
    pub fn new(gatt: G, name: DeviceName, settings: EngineSettings, executor: Rc<Executor>) -> Self {
        Self {
            inner: Rc::new(Inner {
                gatt,
                settings,
                executor,
                device_name: RefCell::new(name),
                connection: Cell::new(None),
                authenticated: Cell::new(false),
                handler: RefCell::new(None),
                lifecycle: Lifecycle::new("BLE"),
            }),
        }
    }

    pub fn gatt(&self) -> &G {
        &self.inner.gatt
    }

    /// Spawn the advertise loop and the machine-time task.  Idempotent.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.lifecycle.spawn(
            &inner.executor,
            TASK_ADVERTISE,
            advertise_loop(inner.clone()),
        ) {
            info!("BLE: engine started as '{}'", inner.device_name.borrow());
        }
        inner.lifecycle.spawn(
            &inner.executor,
            TASK_MACHINE_TIME,
            machine_time_task(inner.clone()),
        );
    }

    /// Bounded shutdown of all engine tasks; drops any remaining link.
    pub async fn destroy(&self) -> ShutdownOutcome {
        let outcome = self
            .inner
            .lifecycle
            .shutdown(self.inner.settings.shutdown_timeout)
            .await;
        if let Some(conn) = self.inner.connection.take() {
            // Forced cancel can leave the link up.
            if self.inner.gatt.disconnect(conn).is_ok() {
                info!("BLE: dropped {:?} on shutdown", conn);
            }
        }
        self.inner.authenticated.set(false);
        info!("BLE: engine destroyed ({:?})", outcome);
        outcome
    }

    pub fn set_event_handler(&self, handler: Rc<dyn BleEventHandler>) {
        *self.inner.handler.borrow_mut() = Some(handler);
    }

    pub fn clear_event_handler(&self) {
        self.inner.handler.borrow_mut().take();
    }

    pub fn has_event_handler(&self) -> bool {
        self.inner.handler.borrow().is_some()
    }

    pub fn connection(&self) -> Option<ConnHandle> {
        self.inner.connection.get()
    }

    /// Connected and past the handshake.
    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.get()
    }

    pub fn device_name(&self) -> DeviceName {
        self.inner.device_name.borrow().clone()
    }

    /// Takes effect on the next advertising round.
    pub fn set_device_name(&self, name: DeviceName) {
        info!("BLE: device name set to '{}' for next advertising round", name);
        *self.inner.device_name.borrow_mut() = name;
    }

    pub fn request_service_running(&self) -> bool {
        self.inner.lifecycle.is_running(TASK_REQUESTS)
    }

    pub fn active_tasks(&self) -> usize {
        self.inner.lifecycle.active_tasks()
    }

    /// Store a new Bioinfo value and push it to an authenticated central.
    pub fn update_bioinfo(&self, payload: &[u8; BIOINFO_LEN]) {
        let inner = &self.inner;
        if let Err(e) = inner.gatt.write_local(Characteristic::Bioinfo, payload) {
            warn!("BLE: bioinfo update failed: {}", e);
            return;
        }
        if let (true, Some(conn)) = (inner.authenticated.get(), inner.connection.get()) {
            if let Err(e) = inner.gatt.notify(conn, Characteristic::Bioinfo, payload) {
                warn!("BLE: bioinfo notify failed: {}", e);
            }
        }
        inner.emit(|h| h.on_bioinfo_data_updated());
    }

    /// Handle that does not keep the engine alive.  The registered
    /// handler may hold one without forming a cycle back to the engine.
    pub fn downgrade(&self) -> WeakPeripheral<G> {
        WeakPeripheral {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Non-owning engine handle; see [`BlePeripheral::downgrade`].
pub struct WeakPeripheral<G: GattServer + 'static> {
    inner: Weak<Inner<G>>,
}

impl<G: GattServer + 'static> WeakPeripheral<G> {
    pub fn upgrade(&self) -> Option<BlePeripheral<G>> {
        self.inner.upgrade().map(|inner| BlePeripheral { inner })
    }
}

impl<G: GattServer + 'static> PeripheralControl for WeakPeripheral<G> {
    fn publish_bioinfo(&self, payload: &[u8; BIOINFO_LEN]) {
        match self.upgrade() {
            Some(engine) => engine.update_bioinfo(payload),
            None => debug!("BLE: engine dropped, bioinfo discarded"),
        }
    }

    fn rename(&self, name: DeviceName) {
        match self.upgrade() {
            Some(engine) => engine.set_device_name(name),
            None => debug!("BLE: engine dropped, rename to '{}' discarded", name),
        }
    }

    fn has_session(&self) -> bool {
        self.upgrade().is_some_and(|engine| engine.is_authenticated())
    }
}

impl<G: GattServer> Inner<G> {
    fn emit(&self, event: impl FnOnce(&dyn BleEventHandler)) {
        // Clone out so the handler may re-register without a borrow conflict.
        let handler = self.handler.borrow().clone();
        match handler {
            Some(handler) => event(handler.as_ref()),
            None => debug!("BLE: no handler registered, event dropped"),
        }
    }

    /// Indicate `data` on Response and wait for the acknowledgment.
    async fn indicate_response(&self, conn: ConnHandle, data: &[u8]) -> Result<(), BleError> {
        with_timeout(
            self.settings.handshake.ack,
            self.gatt.indicate(conn, Characteristic::Response, data),
        )
        .await
        .map_err(|_| BleError::Timeout)?
    }

    async fn respond(&self, conn: ConnHandle, data: &[u8]) {
        if let Err(e) = self.indicate_response(conn, data).await {
            warn!("BLE: response indicate failed: {}", e);
        }
    }

    async fn serve_request(&self, conn: ConnHandle, payload: &[u8]) {
        let Ok(text) = core::str::from_utf8(payload) else {
            warn!("BLE: request is not UTF-8 ({} bytes)", payload.len());
            self.respond(conn, BAD_RESPONSE).await;
            return;
        };
        match codec::parse_request(text) {
            Ok((command, argument)) => {
                info!("BLE: command {:?} argument {:?}", command, argument);
                self.respond(conn, OK_RESPONSE).await;
                self.emit(|h| h.on_command(command, argument));
            }
            Err(e) => {
                warn!("BLE: rejected request '{}': {}", text, e);
                self.respond(conn, BAD_RESPONSE).await;
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tasks
// ───────────────────────────────────────────────────────────────

async fn advertise_loop<G: GattServer + 'static>(inner: Rc<Inner<G>>) {
    let stop = inner.lifecycle.stop_flag();
    while !stop.is_set() {
        let name = inner.device_name.borrow().clone();
        let params = AdvertiseParams {
            name: &name,
            appearance: inner.settings.appearance,
            interval_us: inner.settings.adv_interval_us,
        };
        let conn = match stop.guard(inner.gatt.advertise(&params)).await {
            None => break,
            Some(Ok(conn)) => conn,
            Some(Err(e)) => {
                warn!("BLE: advertising failed: {}", e);
                stop.guard(Timer::after(RETRY_BACKOFF)).await;
                continue;
            }
        };

        inner.connection.set(Some(conn));
        info!("BLE: central connected {:?}", conn);
        inner.emit(|h| h.on_connect());

        let accepted = stop
            .guard(handshake::perform(&inner.gatt, conn, inner.settings.handshake))
            .await
            .unwrap_or(false);

        let mut link_up = true;
        if accepted && !stop.is_set() {
            inner.authenticated.set(true);
            inner.emit(|h| h.on_handshake_success());
            inner.lifecycle.spawn(
                &inner.executor,
                TASK_REQUESTS,
                request_service(inner.clone(), conn),
            );
            link_up = stop.guard(inner.gatt.disconnected(conn)).await.is_none();
        }
        if link_up {
            if let Err(e) = inner.gatt.disconnect(conn) {
                debug!("BLE: force disconnect of {:?}: {}", conn, e);
            }
        }

        inner.authenticated.set(false);
        inner.emit(|h| h.on_disconnect());
        inner.lifecycle.cancel(TASK_REQUESTS).await;
        inner.connection.set(None);
        info!("BLE: central {:?} gone", conn);
    }
    debug!("BLE: advertise loop stopped");
}

async fn request_service<G: GattServer + 'static>(inner: Rc<Inner<G>>, conn: ConnHandle) {
    let stop = inner.lifecycle.stop_flag();
    loop {
        let Some(written) = stop
            .guard(inner.gatt.written(conn, Characteristic::Request))
            .await
        else {
            break;
        };
        match written {
            Ok(payload) => inner.serve_request(conn, &payload).await,
            Err(e) => {
                warn!("BLE: request read failed: {}", e);
                if stop.guard(Timer::after(RETRY_BACKOFF)).await.is_none() {
                    break;
                }
            }
        }
    }
    debug!("BLE: request service stopped");
}

async fn machine_time_task<G: GattServer + 'static>(inner: Rc<Inner<G>>) {
    let stop = inner.lifecycle.stop_flag();
    while !stop.is_set() {
        let secs = Instant::now().as_secs() as i32;
        if let Err(e) = inner
            .gatt
            .write_local(Characteristic::MachineTime, &codec::encode_machine_time(secs))
        {
            warn!("BLE: machine time update failed: {}", e);
        }
        if stop.guard(Timer::after(MACHINE_TIME_PERIOD)).await.is_none() {
            break;
        }
    }
    debug!("BLE: machine time task stopped");
}
