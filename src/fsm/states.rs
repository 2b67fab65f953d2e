//! The three application states.
//!
//! Each state reacts to engine events by requesting a transition; none
//! of them swaps itself.  Only [`DataState`] owns background work (the
//! telemetry push), which lives exactly as long as the state.

use core::cell::RefCell;
use std::rc::Rc;

use edge_executor::Task;
use embassy_time::Timer;
use log::{debug, info, warn};

use super::StateId;
use super::context::ContextShared;
use crate::ble::{BleEventHandler, Command};

fn unhandled(state: StateId, command: Command, argument: Option<&str>) {
    warn!(
        "FSM: {} ignores command '{}' (argument {:?})",
        state.name(),
        command.token(),
        argument
    );
}

// ═══════════════════════════════════════════════════════════════════════════
//  ADVERTISING
// ═══════════════════════════════════════════════════════════════════════════

/// No authenticated central.  Sensors are paused.
pub struct AdvertisingState {
    ctx: Rc<ContextShared>,
}

impl AdvertisingState {
    pub fn new(ctx: Rc<ContextShared>) -> Self {
        Self { ctx }
    }

    pub fn enter(&self) {
        info!("FSM: advertising, waiting for a central");
    }

    pub fn exit(&self) {}
}

impl BleEventHandler for AdvertisingState {
    fn on_connect(&self) {
        info!("FSM: central connected, awaiting handshake");
    }

    fn on_handshake_success(&self) {
        self.ctx.request_transition(StateId::Data);
    }

    fn on_disconnect(&self) {
        debug!("FSM: central left before the handshake completed");
    }

    fn on_bioinfo_data_updated(&self) {}

    fn on_command(&self, command: Command, argument: Option<&str>) {
        unhandled(StateId::Advertising, command, argument);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  SETUP
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration mode: sensors paused, rename accepted.
pub struct SetupState {
    ctx: Rc<ContextShared>,
}

impl SetupState {
    pub fn new(ctx: Rc<ContextShared>) -> Self {
        Self { ctx }
    }

    pub fn enter(&self) {
        info!("FSM: setup mode");
    }

    pub fn exit(&self) {}
}

impl BleEventHandler for SetupState {
    fn on_connect(&self) {}

    fn on_handshake_success(&self) {}

    fn on_disconnect(&self) {
        self.ctx.request_transition(StateId::Advertising);
    }

    fn on_bioinfo_data_updated(&self) {}

    fn on_command(&self, command: Command, argument: Option<&str>) {
        match (command, argument) {
            (Command::DataMode, _) => self.ctx.request_transition(StateId::Data),
            (Command::UpdateName, Some(name)) if !name.is_empty() => {
                if let Err(e) = self.ctx.update_name(name) {
                    warn!("FSM: rename to '{}' rejected: {}", name, e);
                }
            }
            _ => unhandled(StateId::Setup, command, argument),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  DATA
// ═══════════════════════════════════════════════════════════════════════════

/// Streaming telemetry to the authenticated central.
pub struct DataState {
    ctx: Rc<ContextShared>,
    tasks: RefCell<Vec<Task<()>>>,
}

impl DataState {
    pub fn new(ctx: Rc<ContextShared>) -> Self {
        Self {
            ctx,
            tasks: RefCell::new(Vec::new()),
        }
    }

    pub fn enter(&self) {
        info!("FSM: data mode");
        let task = self.ctx.executor().spawn(data_service(self.ctx.clone()));
        self.tasks.borrow_mut().push(task);
    }

    /// Dropping a task cancels it before its next poll.
    pub fn exit(&self) {
        let cancelled = self.tasks.borrow_mut().drain(..).count();
        debug!("FSM: data mode exit, {} task(s) cancelled", cancelled);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl BleEventHandler for DataState {
    fn on_connect(&self) {}

    fn on_handshake_success(&self) {}

    fn on_disconnect(&self) {
        self.ctx.request_transition(StateId::Advertising);
    }

    fn on_bioinfo_data_updated(&self) {
        debug!("FSM: bioinfo pushed");
    }

    fn on_command(&self, command: Command, argument: Option<&str>) {
        match command {
            Command::SetupMode => self.ctx.request_transition(StateId::Setup),
            _ => unhandled(StateId::Data, command, argument),
        }
    }
}

async fn data_service(ctx: Rc<ContextShared>) {
    let interval = ctx.config().update_interval();
    loop {
        if let Err(e) = ctx.send_data() {
            warn!("FSM: skipping bioinfo update: {}", e);
        }
        Timer::after(interval).await;
    }
}
