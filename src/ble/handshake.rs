//! Greeting exchange that admits a central to the request protocol.
//!
//! ```text
//!   central                     peripheral
//!      │── write Request "hello" ──▶│   (within handshake timeout)
//!      │◀── indicate Response "howdy"│   (ack within indicate timeout)
//! ```
//!
//! Every failure path collapses into `false` with a logged reason.

use core::fmt;

use embassy_time::{Duration, with_timeout};
use log::{info, warn};

use super::codec::{HANDSHAKE_ACK, HANDSHAKE_GREETING};
use super::{Characteristic, ConnHandle, GattServer};
use crate::error::BleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeError {
    Timeout,
    Empty,
    InvalidUtf8,
    Mismatch,
    AckTimeout,
    Link(BleError),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "no greeting before timeout"),
            Self::Empty => write!(f, "empty greeting"),
            Self::InvalidUtf8 => write!(f, "greeting is not UTF-8"),
            Self::Mismatch => write!(f, "unexpected greeting"),
            Self::AckTimeout => write!(f, "acknowledgment not confirmed in time"),
            Self::Link(e) => write!(f, "link error: {e}"),
        }
    }
}

impl From<BleError> for HandshakeError {
    fn from(e: BleError) -> Self {
        Self::Link(e)
    }
}

/// Timeouts for the two halves of the exchange.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeTimeouts {
    pub greeting: Duration,
    pub ack: Duration,
}

/// Run the handshake on `conn`.  Returns the outcome; never errors.
pub async fn perform<G: GattServer>(gatt: &G, conn: ConnHandle, timeouts: HandshakeTimeouts) -> bool {
    match exchange(gatt, conn, timeouts).await {
        Ok(()) => {
            info!("BLE: handshake accepted on {:?}", conn);
            true
        }
        Err(reason) => {
            warn!("BLE: handshake failed on {:?}: {}", conn, reason);
            false
        }
    }
}

async fn exchange<G: GattServer>(
    gatt: &G,
    conn: ConnHandle,
    timeouts: HandshakeTimeouts,
) -> Result<(), HandshakeError> {
    let payload = with_timeout(timeouts.greeting, gatt.written(conn, Characteristic::Request))
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    if payload.is_empty() {
        return Err(HandshakeError::Empty);
    }
    let greeting = core::str::from_utf8(&payload).map_err(|_| HandshakeError::InvalidUtf8)?;
    if greeting != HANDSHAKE_GREETING {
        return Err(HandshakeError::Mismatch);
    }
    with_timeout(
        timeouts.ack,
        gatt.indicate(conn, Characteristic::Response, HANDSHAKE_ACK),
    )
    .await
    .map_err(|_| HandshakeError::AckTimeout)??;
    Ok(())
}
