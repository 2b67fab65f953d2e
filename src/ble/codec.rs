//! Wire encodings for the Bioinfo service.
//!
//! - Request text grammar: `<token>` or `<token> <argument>`
//! - Response sentinels and handshake strings
//! - Bioinfo (20 bytes) and Machine-Time (4 bytes) little-endian layouts

use core::fmt;

use crate::fsm::context::TelemetrySnapshot;

/// First Request write a central must send after connecting.
pub const HANDSHAKE_GREETING: &str = "hello";
/// Indicated on Response when the greeting matches.
pub const HANDSHAKE_ACK: &[u8] = b"howdy";

pub const OK_RESPONSE: &[u8] = b"OK";
pub const BAD_RESPONSE: &[u8] = b"BAD";

pub const BIOINFO_LEN: usize = 20;
pub const MACHINE_TIME_LEN: usize = 4;

// ───────────────────────────────────────────────────────────────
// Commands
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `setup_mode`
    SetupMode,
    /// `data_mode`
    DataMode,
    /// `name <new-name>`
    UpdateName,
}

impl Command {
    pub const fn token(self) -> &'static str {
        match self {
            Self::SetupMode => "setup_mode",
            Self::DataMode => "data_mode",
            Self::UpdateName => "name",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "setup_mode" => Some(Self::SetupMode),
            "data_mode" => Some(Self::DataMode),
            "name" => Some(Self::UpdateName),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownToken,
    TooManyArguments,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty request"),
            Self::UnknownToken => write!(f, "unknown command token"),
            Self::TooManyArguments => write!(f, "more than one argument"),
        }
    }
}

/// Split a request into its command and optional argument.
///
/// Fields are separated by single spaces, so `"name  x"` carries two
/// arguments (an empty one and `x`) and is rejected.
pub fn parse_request(text: &str) -> Result<(Command, Option<&str>), ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut fields = text.split(' ');
    let token = fields.next().unwrap_or_default();
    let argument = fields.next();
    if fields.next().is_some() {
        return Err(ParseError::TooManyArguments);
    }
    let command = Command::from_token(token).ok_or(ParseError::UnknownToken)?;
    Ok((command, argument))
}

// ───────────────────────────────────────────────────────────────
// Characteristic payloads
// ───────────────────────────────────────────────────────────────

pub fn encode_bioinfo(snapshot: &TelemetrySnapshot) -> [u8; BIOINFO_LEN] {
    let mut out = [0u8; BIOINFO_LEN];
    out[0..4].copy_from_slice(&snapshot.temperature.to_le_bytes());
    out[4..8].copy_from_slice(&snapshot.humidity.to_le_bytes());
    out[8..12].copy_from_slice(&snapshot.pm2_5.to_le_bytes());
    out[12..16].copy_from_slice(&snapshot.co_concentration.to_le_bytes());
    out[16..20].copy_from_slice(&snapshot.last_update.to_le_bytes());
    out
}

/// Central-side view of a Bioinfo value.
pub fn decode_bioinfo(data: &[u8]) -> Option<TelemetrySnapshot> {
    let data: &[u8; BIOINFO_LEN] = data.try_into().ok()?;
    let word = |at: usize| [data[at], data[at + 1], data[at + 2], data[at + 3]];
    Some(TelemetrySnapshot {
        temperature: f32::from_le_bytes(word(0)),
        humidity: f32::from_le_bytes(word(4)),
        pm2_5: f32::from_le_bytes(word(8)),
        co_concentration: f32::from_le_bytes(word(12)),
        last_update: i32::from_le_bytes(word(16)),
    })
}

pub fn encode_machine_time(secs: i32) -> [u8; MACHINE_TIME_LEN] {
    secs.to_le_bytes()
}
