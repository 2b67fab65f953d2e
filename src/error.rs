//! Unified error types for the Bioinfo firmware.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! controller loop's error handling uniform.  All variants are `Copy` so
//! they pass through sensor tasks and the FSM without allocation.

use core::fmt;

use crate::fsm::StateId;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor transport failed or produced an invalid frame.
    Sensor(SensorError),
    /// The BLE stack rejected an operation or the link dropped.
    Ble(BleError),
    /// Configuration is invalid or could not be persisted.
    Config(&'static str),
    /// A telemetry field is still unset; the named field is the first one missing.
    DataNotReady(&'static str),
    /// A state requested a transition outside the transition table.
    InvalidTransition { from: StateId, to: StateId },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Ble(e) => write!(f, "ble: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::DataNotReady(field) => write!(f, "data not ready: {field} unset"),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid transition {from:?} -> {to:?}")
            }
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// I2C or UART transfer returned an error.
    Bus,
    /// Not enough bytes arrived within the retry budget.
    NoData,
    /// Fewer bytes than one frame could be read.
    ShortFrame,
    /// Frame did not start with the expected marker bytes.
    BadMarker,
    /// Trailing checksum did not match the computed one.
    ChecksumMismatch,
    /// Status word after power-up did not report a calibrated sensor.
    NotCalibrated,
    /// Busy bit never cleared within the conversion window.
    Busy,
    /// Transport initialisation did not finish in time.
    InitTimeout,
}

impl SensorError {
    /// Errors that mean the byte stream is misaligned or silent and the
    /// transport should be flushed and re-initialised.
    pub fn needs_resync(self) -> bool {
        matches!(
            self,
            Self::NoData | Self::ShortFrame | Self::BadMarker | Self::ChecksumMismatch | Self::Busy
        )
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "bus transfer failed"),
            Self::NoData => write!(f, "no data within retry budget"),
            Self::ShortFrame => write!(f, "short frame"),
            Self::BadMarker => write!(f, "bad frame marker"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::NotCalibrated => write!(f, "sensor not calibrated"),
            Self::Busy => write!(f, "sensor busy"),
            Self::InitTimeout => write!(f, "initialisation timed out"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// BLE errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    /// Operation needs a connection but none exists.
    NotConnected,
    /// The central dropped the link while the operation was pending.
    Disconnected,
    /// The central did not acknowledge an indication in time.
    Timeout,
    /// Payload exceeds the attribute size.
    ValueTooLong,
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Timeout => write!(f, "timed out"),
            Self::ValueTooLong => write!(f, "value exceeds attribute size"),
        }
    }
}

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Self::Ble(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
