//! Aosong DHT20 humidity / temperature sensor over I2C.
//!
//! Measurement cycle (datasheet §7.4):
//!
//! 1. ≥100 ms after power-up, read the status word (`0x71`); it must
//!    be `0x18` (calibrated)
//! 2. wait 10 ms, write trigger `AC 33 00`
//! 3. wait 80 ms, then poll status until bit 7 (busy) clears
//! 4. read 6 bytes: state, then two packed 20-bit fields
//!
//! ```text
//!  byte  1        2        3        4        5
//!        HHHHHHHH HHHHHHHH HHHHTTTT TTTTTTTT TTTTTTTT
//! ```

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use super::FrameSource;
use crate::config::SystemConfig;
use crate::error::SensorError;

pub const ADDRESS: u8 = 0x38;
pub const STATUS_COMMAND: u8 = 0x71;
pub const STATUS_CALIBRATED: u8 = 0x18;
pub const TRIGGER_COMMAND: [u8; 3] = [0xAC, 0x33, 0x00];
pub const STATUS_BUSY: u8 = 0x80;
pub const FRAME_LEN: usize = 6;

const SETTLE: Duration = Duration::from_millis(100);
const PRE_TRIGGER: Duration = Duration::from_millis(10);
const CONVERSION: Duration = Duration::from_millis(80);
const BUSY_POLL: Duration = Duration::from_millis(10);
const BUSY_WINDOW: Duration = Duration::from_secs(1);

const FULL_SCALE: f32 = 1_048_576.0; // 2^20

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dht20Reading {
    /// Relative humidity, 0..1.
    pub humidity: f32,
    /// °C.
    pub temperature: f32,
}

impl Default for Dht20Reading {
    fn default() -> Self {
        Self {
            humidity: f32::NEG_INFINITY,
            temperature: f32::NEG_INFINITY,
        }
    }
}

impl Dht20Reading {
    pub fn is_set(&self) -> bool {
        self.humidity.is_finite() && self.temperature.is_finite()
    }
}

/// Decode the 6-byte measurement frame.  Byte 0 is the state field
/// and is not interpreted here.
pub fn decode(frame: &[u8; FRAME_LEN]) -> Dht20Reading {
    let packed = frame[1..]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let raw_humidity = ((packed >> 20) & 0xF_FFFF) as f32;
    let raw_temperature = (packed & 0xF_FFFF) as f32;
    Dht20Reading {
        humidity: raw_humidity / FULL_SCALE,
        temperature: raw_temperature / FULL_SCALE * 200.0 - 50.0,
    }
}

pub struct Dht20<I> {
    i2c: I,
    interval: Duration,
    last_trigger: Option<Instant>,
}

impl<I: I2c> Dht20<I> {
    /// `interval` is the minimum spacing between measurement triggers.
    pub fn new(i2c: I, interval: Duration) -> Self {
        Self {
            i2c,
            interval,
            last_trigger: None,
        }
    }

    pub fn from_config(i2c: I, config: &SystemConfig) -> Self {
        Self::new(i2c, config.sensor_interval())
    }

    /// Give the bus back (e.g. to share it after teardown).
    pub fn release(self) -> I {
        self.i2c
    }

    fn read_status(&mut self) -> Result<u8, SensorError> {
        let mut status = [0u8; 1];
        self.i2c
            .write(ADDRESS, &[STATUS_COMMAND])
            .map_err(|_| SensorError::Bus)?;
        self.i2c
            .read(ADDRESS, &mut status)
            .map_err(|_| SensorError::Bus)?;
        Ok(status[0])
    }

    fn check_calibrated(&mut self) -> Result<(), SensorError> {
        let status = self.read_status()?;
        if status != STATUS_CALIBRATED {
            warn!("DHT20: status word {:#04x}, expected {:#04x}", status, STATUS_CALIBRATED);
            return Err(SensorError::NotCalibrated);
        }
        Ok(())
    }

    async fn pace(&mut self) {
        if let Some(last) = self.last_trigger {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                Timer::after(self.interval - elapsed).await;
            }
        }
    }

    async fn wait_ready(&mut self) -> Result<(), SensorError> {
        let deadline = Instant::now() + BUSY_WINDOW;
        loop {
            if self.read_status()? & STATUS_BUSY == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SensorError::Busy);
            }
            debug!("DHT20: conversion in progress");
            Timer::after(BUSY_POLL).await;
        }
    }
}

impl<I: I2c> FrameSource for Dht20<I> {
    type Reading = Dht20Reading;

    async fn init(&mut self) -> Result<(), SensorError> {
        Timer::after(SETTLE).await;
        self.check_calibrated()?;
        info!("DHT20: calibrated");
        Ok(())
    }

    async fn acquire(&mut self) -> Result<Dht20Reading, SensorError> {
        self.pace().await;
        Timer::after(PRE_TRIGGER).await;
        self.last_trigger = Some(Instant::now());
        self.i2c
            .write(ADDRESS, &TRIGGER_COMMAND)
            .map_err(|_| SensorError::Bus)?;
        Timer::after(CONVERSION).await;
        self.wait_ready().await?;

        let mut frame = [0u8; FRAME_LEN];
        self.i2c
            .read(ADDRESS, &mut frame)
            .map_err(|_| SensorError::Bus)?;
        Ok(decode(&frame))
    }

    async fn resync(&mut self) -> Result<(), SensorError> {
        self.check_calibrated()
    }
}
