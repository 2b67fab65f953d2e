//! BLE peripheral: GATT model, platform port, and event sink contract.
//!
//! ## GATT Service Layout
//!
//! Service `0x181A` (environmental sensing):
//!
//! | Characteristic | UUID                                   | Perms        | Payload                  |
//! |----------------|----------------------------------------|--------------|--------------------------|
//! | Bioinfo        | `9fda7cce-48d4-4b1a-9026-6d46eec4e63a` | Read+Notify  | 4×f32 LE + i32 LE        |
//! | Machine time   | `4fd3a9d8-5e82-4c1e-a2d3-9bc23f3a8341` | Read         | i32 LE seconds           |
//! | Request        | `4f2d7b8e-23b9-4bc7-905f-a8e3d7841f6a` | Write        | UTF-8 command            |
//! | Response       | `93e89c7d-65e3-41e6-b59f-1f3a6478de45` | Indicate     | `OK` / `BAD` / `howdy`   |
//!
//! The radio stack itself sits behind [`GattServer`]; the engine in
//! [`engine`] only speaks to that trait, so host builds run against
//! [`crate::adapters::sim_gatt::SimGatt`].

pub mod codec;
pub mod engine;
pub mod handshake;

pub use codec::Command;
pub use engine::BlePeripheral;

use crate::error::BleError;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

/// org.bluetooth.service.environmental_sensing
pub const SERVICE_UUID: u16 = 0x181A;
pub const CHAR_BIOINFO: u128 = 0x9fda7cce_48d4_4b1a_9026_6d46eec4e63a;
pub const CHAR_REQUEST: u128 = 0x4f2d7b8e_23b9_4bc7_905f_a8e3d7841f6a;
pub const CHAR_RESPONSE: u128 = 0x93e89c7d_65e3_41e6_b59f_1f3a6478de45;
pub const CHAR_MACHINE_TIME: u128 = 0x4fd3a9d8_5e82_4c1e_a2d3_9bc23f3a8341;

/// org.bluetooth.characteristic.gap.appearance: generic thermometer
pub const ADV_APPEARANCE_GENERIC_THERMOMETER: u16 = 768;
pub const ADV_INTERVAL_US: u32 = 250_000;

/// Largest attribute value the service carries.
pub const MAX_ATTR_LEN: usize = 128;

pub type AttrValue = heapless::Vec<u8, MAX_ATTR_LEN>;

/// Copy `data` into an [`AttrValue`], rejecting oversized payloads.
pub fn attr_value(data: &[u8]) -> Result<AttrValue, BleError> {
    AttrValue::from_slice(data).map_err(|_| BleError::ValueTooLong)
}

// ───────────────────────────────────────────────────────────────
// GATT model
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    Bioinfo,
    MachineTime,
    Request,
    Response,
}

impl Characteristic {
    pub const ALL: [Self; 4] = [
        Self::Bioinfo,
        Self::MachineTime,
        Self::Request,
        Self::Response,
    ];

    pub const fn uuid(self) -> u128 {
        match self {
            Self::Bioinfo => CHAR_BIOINFO,
            Self::MachineTime => CHAR_MACHINE_TIME,
            Self::Request => CHAR_REQUEST,
            Self::Response => CHAR_RESPONSE,
        }
    }

    pub const fn properties(self) -> Properties {
        match self {
            Self::Bioinfo => Properties {
                read: true,
                write: false,
                notify: true,
                indicate: false,
            },
            Self::MachineTime => Properties {
                read: true,
                write: false,
                notify: false,
                indicate: false,
            },
            Self::Request => Properties {
                read: false,
                write: true,
                notify: false,
                indicate: false,
            },
            Self::Response => Properties {
                read: false,
                write: false,
                notify: false,
                indicate: true,
            },
        }
    }

    /// Dense index for per-characteristic tables.
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// Handle of the (single) attached central.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnHandle(pub u16);

#[derive(Debug, Clone, Copy)]
pub struct AdvertiseParams<'a> {
    pub name: &'a str,
    pub appearance: u16,
    pub interval_us: u32,
}

// ───────────────────────────────────────────────────────────────
// Platform port
// ───────────────────────────────────────────────────────────────

/// The radio stack as seen by the engine.
///
/// All waits are cancel-safe: dropping a pending future leaves the stack
/// in a consistent state.  Implementations run on the single-threaded
/// executor and use interior mutability.
#[allow(async_fn_in_trait)]
pub trait GattServer {
    /// Advertise until a central connects.
    async fn advertise(&self, params: &AdvertiseParams<'_>) -> Result<ConnHandle, BleError>;

    /// Wait for the next central write to `characteristic`.
    async fn written(
        &self,
        conn: ConnHandle,
        characteristic: Characteristic,
    ) -> Result<AttrValue, BleError>;

    /// Indicate `data` and wait for the central's acknowledgment.
    async fn indicate(
        &self,
        conn: ConnHandle,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), BleError>;

    /// Unacknowledged push of `data`.
    fn notify(
        &self,
        conn: ConnHandle,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), BleError>;

    /// Set the value centrals read.
    fn write_local(&self, characteristic: Characteristic, data: &[u8]) -> Result<(), BleError>;

    /// Resolve once `conn` is gone.
    async fn disconnected(&self, conn: ConnHandle);

    /// Drop the link from the peripheral side.
    fn disconnect(&self, conn: ConnHandle) -> Result<(), BleError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink
// ───────────────────────────────────────────────────────────────

/// Receiver of engine events.  Exactly one is registered at a time; the
/// engine calls it synchronously at the point each event occurs.
pub trait BleEventHandler {
    fn on_connect(&self);
    fn on_handshake_success(&self);
    fn on_disconnect(&self);
    fn on_bioinfo_data_updated(&self);
    fn on_command(&self, command: Command, argument: Option<&str>);
}
