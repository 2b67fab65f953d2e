//! In-memory GATT stack for host builds.
//!
//! Implements [`GattServer`] for the peripheral side and exposes a small
//! central-side API (`connect`, `write_request`, `central_disconnect`,
//! `indications`, ...) so tests and bench simulations can play the
//! phone.  Clones share one radio.
//!
//! Every state change wakes every parked waiter; each waiter re-checks
//! its own condition.  Waits are cancel-safe: a queued request write is
//! only consumed when the waiting future completes.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Poll, Waker};
use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, info};

use crate::ble::{
    AdvertiseParams, AttrValue, Characteristic, ConnHandle, GattServer, attr_value,
};
use crate::error::BleError;

#[derive(Clone, Default)]
pub struct SimGatt {
    inner: Rc<SimInner>,
}

#[derive(Default)]
struct SimInner {
    state: RefCell<SimState>,
    waiters: RefCell<Vec<Waker>>,
}

#[derive(Default)]
struct SimState {
    connect_pending: bool,
    advertising: bool,
    advertised_names: Vec<String>,
    connection: Option<ConnHandle>,
    next_handle: u16,
    requests: VecDeque<AttrValue>,
    values: [AttrValue; 4],
    indications: Vec<Vec<u8>>,
    notifications: Vec<Vec<u8>>,
    withhold_acks: bool,
    peripheral_disconnects: usize,
}

impl SimGatt {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let out = f(&mut self.inner.state.borrow_mut());
        let waiters = core::mem::take(&mut *self.inner.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }
        out
    }

    fn inspect<T>(&self, f: impl FnOnce(&SimState) -> T) -> T {
        f(&self.inner.state.borrow())
    }

    /// Park until `check` yields a value.  `check` may mutate state; it
    /// only runs while the future is being polled.
    async fn wait_until<T>(&self, mut check: impl FnMut(&mut SimState) -> Option<T>) -> T {
        poll_fn(|cx| {
            let ready = check(&mut self.inner.state.borrow_mut());
            match ready {
                Some(value) => {
                    let waiters = core::mem::take(&mut *self.inner.waiters.borrow_mut());
                    for waker in waiters {
                        waker.wake();
                    }
                    Poll::Ready(value)
                }
                None => {
                    let mut waiters = self.inner.waiters.borrow_mut();
                    if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
                        waiters.push(cx.waker().clone());
                    }
                    Poll::Pending
                }
            }
        })
        .await
    }

    // ── Central side ─────────────────────────────────────────

    /// Ask to connect; completes the next (or current) advertising round.
    pub fn connect(&self) {
        self.update(|s| s.connect_pending = true);
    }

    /// Write to Request.  Dropped (returns `false`) when not connected.
    pub fn write_request(&self, data: &[u8]) -> bool {
        let Ok(value) = attr_value(data) else {
            return false;
        };
        self.update(|s| {
            if s.connection.is_none() && !s.connect_pending {
                return false;
            }
            s.requests.push_back(value);
            true
        })
    }

    /// Central drops the link.
    pub fn central_disconnect(&self) {
        self.update(|s| {
            if let Some(conn) = s.connection.take() {
                debug!("BLE(sim): central dropped {:?}", conn);
            }
            s.requests.clear();
        });
    }

    /// When false, indications are delivered but never acknowledged.
    pub fn set_ack_indications(&self, ack: bool) {
        self.update(|s| s.withhold_acks = !ack);
    }

    pub fn is_connected(&self) -> bool {
        self.inspect(|s| s.connection.is_some())
    }

    pub fn is_advertising(&self) -> bool {
        self.inspect(|s| s.advertising)
    }

    /// Name used by each advertising round so far.
    pub fn advertised_names(&self) -> Vec<String> {
        self.inspect(|s| s.advertised_names.clone())
    }

    pub fn indications(&self) -> Vec<Vec<u8>> {
        self.inspect(|s| s.indications.clone())
    }

    pub fn notifications(&self) -> Vec<Vec<u8>> {
        self.inspect(|s| s.notifications.clone())
    }

    pub fn read(&self, characteristic: Characteristic) -> Vec<u8> {
        self.inspect(|s| s.values[characteristic.index()].to_vec())
    }

    /// Times the peripheral side dropped a link.
    pub fn peripheral_disconnects(&self) -> usize {
        self.inspect(|s| s.peripheral_disconnects)
    }

    pub async fn wait_advertising(&self) {
        self.wait_until(|s| s.advertising.then_some(())).await;
    }

    pub async fn wait_connected(&self) {
        self.wait_until(|s| s.connection.is_some().then_some(())).await;
    }

    pub async fn wait_disconnected(&self) {
        self.wait_until(|s| s.connection.is_none().then_some(())).await;
    }

    /// Resolve once at least `count` indications have been sent in total.
    pub async fn wait_indications(&self, count: usize) -> Vec<Vec<u8>> {
        self.wait_until(|s| (s.indications.len() >= count).then(|| s.indications.clone()))
            .await
    }

    pub async fn wait_notifications(&self, count: usize) -> Vec<Vec<u8>> {
        self.wait_until(|s| (s.notifications.len() >= count).then(|| s.notifications.clone()))
            .await
    }
}

impl GattServer for SimGatt {
    async fn advertise(&self, params: &AdvertiseParams<'_>) -> Result<ConnHandle, BleError> {
        self.update(|s| {
            s.advertising = true;
            s.advertised_names.push(params.name.to_owned());
        });
        info!(
            "BLE(sim): advertising '{}' (appearance {}, {} us)",
            params.name, params.appearance, params.interval_us
        );
        let conn = self
            .wait_until(|s| {
                if !s.connect_pending || s.connection.is_some() {
                    return None;
                }
                s.connect_pending = false;
                s.advertising = false;
                s.next_handle = s.next_handle.wrapping_add(1);
                let conn = ConnHandle(s.next_handle);
                s.connection = Some(conn);
                Some(conn)
            })
            .await;
        info!("BLE(sim): central connected as {:?}", conn);
        Ok(conn)
    }

    async fn written(
        &self,
        conn: ConnHandle,
        characteristic: Characteristic,
    ) -> Result<AttrValue, BleError> {
        self.wait_until(|s| {
            if s.connection != Some(conn) {
                return Some(Err(BleError::Disconnected));
            }
            if characteristic != Characteristic::Request {
                return None;
            }
            s.requests.pop_front().map(Ok)
        })
        .await
    }

    async fn indicate(
        &self,
        conn: ConnHandle,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), BleError> {
        let withhold = self.update(|s| {
            if s.connection != Some(conn) {
                return Err(BleError::NotConnected);
            }
            s.values[characteristic.index()] = attr_value(data)?;
            s.indications.push(data.to_vec());
            Ok(s.withhold_acks)
        })?;
        if withhold {
            core::future::pending::<()>().await;
        }
        Ok(())
    }

    fn notify(
        &self,
        conn: ConnHandle,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), BleError> {
        self.update(|s| {
            if s.connection != Some(conn) {
                return Err(BleError::NotConnected);
            }
            s.values[characteristic.index()] = attr_value(data)?;
            s.notifications.push(data.to_vec());
            Ok(())
        })
    }

    fn write_local(&self, characteristic: Characteristic, data: &[u8]) -> Result<(), BleError> {
        let value = attr_value(data)?;
        self.update(|s| s.values[characteristic.index()] = value);
        Ok(())
    }

    async fn disconnected(&self, conn: ConnHandle) {
        self.wait_until(|s| (s.connection != Some(conn)).then_some(()))
            .await;
    }

    fn disconnect(&self, conn: ConnHandle) -> Result<(), BleError> {
        self.update(|s| {
            if s.connection != Some(conn) {
                return Err(BleError::NotConnected);
            }
            s.connection = None;
            s.requests.clear();
            s.peripheral_disconnects += 1;
            Ok(())
        })?;
        info!("BLE(sim): peripheral dropped {:?}", conn);
        Ok(())
    }
}
