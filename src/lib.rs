//! Bioinfo firmware library.
//!
//! BLE environmental-sensing peripheral: a GATT engine with a handshake
//! and a small command protocol, an application state machine that
//! decides what the engine and the sensors do, and three telemetry
//! decoders (DHT20, PMS7003, ZE07-CO) sharing one lifecycle.
//!
//! Hardware is reached only through port traits (`ble::GattServer`,
//! `sensors::transport::SerialPort`, `embedded_hal::i2c::I2c`,
//! `config::ConfigPort`); `adapters` holds the in-memory
//! implementations used on host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod ble;
pub mod config;
pub mod error;
pub mod fsm;
pub mod lifecycle;
pub mod sensors;

pub use error::{Error, Result};
