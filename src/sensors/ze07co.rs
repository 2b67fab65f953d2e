//! Winsen ZE07-CO electrochemical carbon-monoxide module.
//!
//! 9600 baud, initiative-upload mode, 9-byte frames:
//!
//! ```text
//!  FF  04  03  01  CH  CL  RH  RL  SUM
//!  │   │   │   │   └─┬─┘   └─┬─┘   └─ (~Σ bytes[1..8] + 1) & 0xFF
//!  │   gas unit dec  conc×10  range×10
//!  start
//! ```

use super::transport::{FrameCodec, UartFrameSource};
use crate::error::SensorError;

pub const FRAME_LEN: usize = 9;
pub const START_BYTE: u8 = 0xFF;

/// Select initiative-upload (streaming) mode.
pub const INIT_COMMAND: [u8; FRAME_LEN] = [0xFF, 0x01, 0x78, 0x40, 0x00, 0x00, 0x00, 0x00, 0x47];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ze07CoReading {
    /// CO concentration (ppm).
    pub concentration_ppm: f32,
    /// Full-scale measurement range (ppm).
    pub range_ppm: f32,
}

impl Default for Ze07CoReading {
    fn default() -> Self {
        Self {
            concentration_ppm: f32::NEG_INFINITY,
            range_ppm: f32::NEG_INFINITY,
        }
    }
}

impl Ze07CoReading {
    pub fn is_set(&self) -> bool {
        self.concentration_ppm.is_finite()
    }
}

/// Two's complement of the sum of bytes 1..=7.
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    let sum = frame[1..8].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

pub struct Ze07Co;

impl FrameCodec for Ze07Co {
    type Reading = Ze07CoReading;

    const FRAME_LEN: usize = FRAME_LEN;
    const INIT_COMMAND: &'static [u8] = &INIT_COMMAND;

    fn decode(frame: &[u8]) -> Result<Ze07CoReading, SensorError> {
        let Some(frame) = frame.first_chunk::<FRAME_LEN>() else {
            return Err(SensorError::ShortFrame);
        };
        if frame[0] != START_BYTE {
            return Err(SensorError::BadMarker);
        }
        if checksum(frame) != frame[8] {
            return Err(SensorError::ChecksumMismatch);
        }
        let scaled = |at: usize| f32::from(u16::from_be_bytes([frame[at], frame[at + 1]])) * 0.1;
        Ok(Ze07CoReading {
            concentration_ppm: scaled(4),
            range_ppm: scaled(6),
        })
    }
}

pub type Ze07CoSource<P> = UartFrameSource<Ze07Co, P>;

/// Build a valid upload frame (bench fixtures, tests).
pub fn encode_frame(concentration_tenths: u16, range_tenths: u16) -> [u8; FRAME_LEN] {
    let mut frame = [START_BYTE, 0x04, 0x03, 0x01, 0, 0, 0, 0, 0];
    frame[4..6].copy_from_slice(&concentration_tenths.to_be_bytes());
    frame[6..8].copy_from_slice(&range_tenths.to_be_bytes());
    frame[8] = checksum(&frame);
    frame
}
