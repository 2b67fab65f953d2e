//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter        | Implements   | Connects to                      |
//! |----------------|--------------|----------------------------------|
//! | `sim_gatt`     | GattServer   | in-memory GATT table + central   |
//! | `sim_serial`   | SerialPort   | in-memory UART line              |
//! | `config_store` | ConfigPort   | text file / in-memory store      |
//!
//! Hardware builds supply their own `GattServer`, `SerialPort` and
//! `embedded_hal::i2c::I2c` implementations from the board crate.

pub mod config_store;
pub mod sim_gatt;
pub mod sim_serial;
