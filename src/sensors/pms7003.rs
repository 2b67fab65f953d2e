//! Plantower PMS7003 particulate sensor.
//!
//! 9600 baud, active mode, one 32-byte frame per report:
//!
//! | Offset | Field                                   |
//! |--------|-----------------------------------------|
//! | 0..2   | marker `42 4D`                          |
//! | 2..4   | frame length (28)                       |
//! | 4..10  | PM1.0 / PM2.5 / PM10, CF=1 (µg/m³)      |
//! | 10..16 | PM1.0 / PM2.5 / PM10, atmospheric       |
//! | 16..28 | particles >0.3/0.5/1.0/2.5/5.0/10 µm /0.1L |
//! | 28..30 | reserved                                |
//! | 30..32 | checksum = Σ bytes[0..30] mod 65536     |
//!
//! All fields are big-endian u16.

use super::transport::{FrameCodec, UartFrameSource};
use crate::error::SensorError;

pub const FRAME_LEN: usize = 32;
pub const MARKER: [u8; 2] = [0x42, 0x4D];

/// Switch to active (streaming) mode.
pub const ACTIVE_MODE_COMMAND: [u8; 7] = [0x42, 0x4D, 0xE1, 0x00, 0x01, 0x01, 0x71];

/// Three mass-concentration channels.  `-1` means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmChannels {
    pub pm1_0: i32,
    pub pm2_5: i32,
    pub pm10: i32,
}

impl Default for PmChannels {
    fn default() -> Self {
        Self {
            pm1_0: -1,
            pm2_5: -1,
            pm10: -1,
        }
    }
}

/// Particle counts per 0.1 L of air above each diameter.  `-1` means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleCounts {
    pub gt_0_3um: i32,
    pub gt_0_5um: i32,
    pub gt_1_0um: i32,
    pub gt_2_5um: i32,
    pub gt_5_0um: i32,
    pub gt_10um: i32,
}

impl Default for ParticleCounts {
    fn default() -> Self {
        Self {
            gt_0_3um: -1,
            gt_0_5um: -1,
            gt_1_0um: -1,
            gt_2_5um: -1,
            gt_5_0um: -1,
            gt_10um: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pms7003Reading {
    /// Factory-calibration group (CF=1).
    pub concentration_cf1: PmChannels,
    /// Atmospheric-environment group; use these for typical readings.
    pub concentration_atm: PmChannels,
    pub particles: ParticleCounts,
}

impl Pms7003Reading {
    pub fn is_set(&self) -> bool {
        self.concentration_atm.pm2_5 >= 0
    }
}

/// Sum of every byte before the trailing checksum, modulo 2^16.
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u16 {
    frame[..FRAME_LEN - 2]
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

pub struct Pms7003;

impl FrameCodec for Pms7003 {
    type Reading = Pms7003Reading;

    const FRAME_LEN: usize = FRAME_LEN;
    const INIT_COMMAND: &'static [u8] = &ACTIVE_MODE_COMMAND;

    fn decode(frame: &[u8]) -> Result<Pms7003Reading, SensorError> {
        let Some(frame) = frame.first_chunk::<FRAME_LEN>() else {
            return Err(SensorError::ShortFrame);
        };
        if frame[..2] != MARKER {
            return Err(SensorError::BadMarker);
        }
        let field = |at: usize| i32::from(u16::from_be_bytes([frame[at], frame[at + 1]]));
        if checksum(frame) != u16::from_be_bytes([frame[30], frame[31]]) {
            return Err(SensorError::ChecksumMismatch);
        }
        Ok(Pms7003Reading {
            concentration_cf1: PmChannels {
                pm1_0: field(4),
                pm2_5: field(6),
                pm10: field(8),
            },
            concentration_atm: PmChannels {
                pm1_0: field(10),
                pm2_5: field(12),
                pm10: field(14),
            },
            particles: ParticleCounts {
                gt_0_3um: field(16),
                gt_0_5um: field(18),
                gt_1_0um: field(20),
                gt_2_5um: field(22),
                gt_5_0um: field(24),
                gt_10um: field(26),
            },
        })
    }
}

pub type Pms7003Source<P> = UartFrameSource<Pms7003, P>;

/// Build a valid frame from twelve data words (bench fixtures, tests).
pub fn encode_frame(words: [u16; 12]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..2].copy_from_slice(&MARKER);
    frame[2..4].copy_from_slice(&28u16.to_be_bytes());
    for (i, word) in words.iter().enumerate() {
        let at = 4 + i * 2;
        frame[at..at + 2].copy_from_slice(&word.to_be_bytes());
    }
    let sum = checksum(&frame);
    frame[30..32].copy_from_slice(&sum.to_be_bytes());
    frame
}
