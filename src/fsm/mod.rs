//! Application state machine.
//!
//! Closed set of three states; each is the engine's event sink while it
//! is installed:
//!
//! ```text
//!              handshake success
//!  ADVERTISING ─────────────────▶ DATA ◀──────────┐
//!      ▲  ▲                        │   data_mode  │
//!      │  │        disconnect      │ setup_mode   │
//!      │  └────────────────────────┤              │
//!      │                           ▼              │
//!      │      disconnect         SETUP ───────────┘
//!      └────────────────────────── ↺ name <new-name>
//! ```
//!
//! States never swap themselves.  They write the single pending slot in
//! [`context::ContextShared`] and the controller loop in
//! [`context::Context::run`] performs the swap:
//!
//! 1. `exit()` the current state (drops its tasks)
//! 2. unregister it from the engine
//! 3. `create()` + `enter()` the next state
//! 4. register it with the engine
//! 5. apply the sensor policy ([`StateId::sensors_active`])
//!
//! The swap is synchronous, so the engine can never deliver an event to
//! a state that is half torn down.

pub mod context;
pub mod states;

use std::rc::Rc;

use crate::ble::{BleEventHandler, Command};
use context::ContextShared;
use states::{AdvertisingState, DataState, SetupState};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Advertising = 0,
    Setup = 1,
    Data = 2,
}

impl StateId {
    pub const ALL: [Self; 3] = [Self::Advertising, Self::Setup, Self::Data];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Advertising => "Advertising",
            Self::Setup => "Setup",
            Self::Data => "Data",
        }
    }

    /// The transition table.  Same-state requests are not transitions
    /// and are filtered out before this is consulted.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Advertising, Self::Data)
                | (Self::Data, Self::Advertising)
                | (Self::Data, Self::Setup)
                | (Self::Setup, Self::Advertising)
                | (Self::Setup, Self::Data)
        )
    }

    /// Whether sensor decoders run (resumed) while this state is installed.
    pub const fn sensors_active(self) -> bool {
        matches!(self, Self::Data)
    }
}

// ---------------------------------------------------------------------------
// Installed state
// ---------------------------------------------------------------------------

pub enum ApplicationState {
    Advertising(AdvertisingState),
    Setup(SetupState),
    Data(DataState),
}

impl ApplicationState {
    pub fn create(id: StateId, ctx: &Rc<ContextShared>) -> Self {
        match id {
            StateId::Advertising => Self::Advertising(AdvertisingState::new(ctx.clone())),
            StateId::Setup => Self::Setup(SetupState::new(ctx.clone())),
            StateId::Data => Self::Data(DataState::new(ctx.clone())),
        }
    }

    pub fn id(&self) -> StateId {
        match self {
            Self::Advertising(_) => StateId::Advertising,
            Self::Setup(_) => StateId::Setup,
            Self::Data(_) => StateId::Data,
        }
    }

    /// Register background tasks.  Never awaits.
    pub fn enter(&self) {
        match self {
            Self::Advertising(s) => s.enter(),
            Self::Setup(s) => s.enter(),
            Self::Data(s) => s.enter(),
        }
    }

    /// Cancel every task spawned by `enter`.
    pub fn exit(&self) {
        match self {
            Self::Advertising(s) => s.exit(),
            Self::Setup(s) => s.exit(),
            Self::Data(s) => s.exit(),
        }
    }

    fn handler(&self) -> &dyn BleEventHandler {
        match self {
            Self::Advertising(s) => s,
            Self::Setup(s) => s,
            Self::Data(s) => s,
        }
    }
}

impl BleEventHandler for ApplicationState {
    fn on_connect(&self) {
        self.handler().on_connect();
    }

    fn on_handshake_success(&self) {
        self.handler().on_handshake_success();
    }

    fn on_disconnect(&self) {
        self.handler().on_disconnect();
    }

    fn on_bioinfo_data_updated(&self) {
        self.handler().on_bioinfo_data_updated();
    }

    fn on_command(&self, command: Command, argument: Option<&str>) {
        self.handler().on_command(command, argument);
    }
}
