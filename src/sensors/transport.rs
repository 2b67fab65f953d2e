//! UART byte transport and the fixed-frame source built on it.
//!
//! Both UART sensors stream fixed-size frames in active mode.  The
//! shared acquisition cycle is:
//!
//! 1. wait until one frame's worth of bytes is buffered, sleeping
//!    `retry_interval` between checks, at most `retry_budget` times
//! 2. read exactly one frame
//! 3. hand it to the codec for marker/checksum validation and scaling

use core::marker::PhantomData;

use embassy_time::{Duration, Timer};
use log::debug;

use super::FrameSource;
use crate::config::SystemConfig;
use crate::error::SensorError;

/// Largest frame any UART codec uses.
pub const MAX_FRAME_LEN: usize = 32;

/// Byte-level serial port.  Hardware setup (pins, baud) happens before
/// the port is handed over.
pub trait SerialPort {
    /// Bytes buffered and ready to read.
    fn available(&mut self) -> usize;

    /// Read up to `buf.len()` buffered bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SensorError>;

    fn write(&mut self, data: &[u8]) -> Result<usize, SensorError>;

    /// Drop everything in the receive buffer.
    fn discard_input(&mut self);
}

/// Frame layout and validation for one sensor.
pub trait FrameCodec {
    type Reading: Copy;

    const FRAME_LEN: usize;

    /// Sent at start-up and after every resync; empty means none.
    const INIT_COMMAND: &'static [u8];

    /// Validate and decode one `FRAME_LEN`-byte frame.
    fn decode(frame: &[u8]) -> Result<Self::Reading, SensorError>;
}

pub struct UartFrameSource<C, P> {
    port: P,
    retry_budget: u8,
    retry_interval: Duration,
    _codec: PhantomData<C>,
}

impl<C: FrameCodec, P: SerialPort> UartFrameSource<C, P> {
    pub fn new(port: P, retry_budget: u8, retry_interval: Duration) -> Self {
        debug_assert!(C::FRAME_LEN <= MAX_FRAME_LEN);
        Self {
            port,
            retry_budget,
            retry_interval,
            _codec: PhantomData,
        }
    }

    pub fn from_config(port: P, config: &SystemConfig) -> Self {
        Self::new(
            port,
            config.sensor_retry_budget,
            config.sensor_retry_interval(),
        )
    }

    fn send_init(&mut self) -> Result<(), SensorError> {
        if C::INIT_COMMAND.is_empty() {
            return Ok(());
        }
        let written = self.port.write(C::INIT_COMMAND)?;
        if written != C::INIT_COMMAND.len() {
            return Err(SensorError::Bus);
        }
        Ok(())
    }
}

impl<C: FrameCodec, P: SerialPort> FrameSource for UartFrameSource<C, P> {
    type Reading = C::Reading;

    async fn init(&mut self) -> Result<(), SensorError> {
        self.send_init()
    }

    async fn acquire(&mut self) -> Result<C::Reading, SensorError> {
        let mut retries = self.retry_budget;
        while self.port.available() < C::FRAME_LEN {
            if retries == 0 {
                return Err(SensorError::NoData);
            }
            retries -= 1;
            Timer::after(self.retry_interval).await;
        }
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = self.port.read(&mut frame[..C::FRAME_LEN])?;
        if len < C::FRAME_LEN {
            return Err(SensorError::ShortFrame);
        }
        C::decode(&frame[..C::FRAME_LEN])
    }

    async fn resync(&mut self) -> Result<(), SensorError> {
        debug!("UART: flushing input and re-sending init command");
        self.port.discard_input();
        self.send_init()
    }
}
