//! Kill-switch and flight-mode transition rules.
//!
//! Callers may only request software block/unblock; hard blocks come and go
//! with the hardware and are observed through URfkill's change signal.

use log::{debug, error};

use crate::Result;
use crate::api::models::{ConnectivityError, KillSwitchState};

/// Checks a software block request against the current state.
pub fn validate_block(state: KillSwitchState) -> Result<()> {
    match state {
        KillSwitchState::NotAvailable => Err(ConnectivityError::ToggleUnavailable),
        KillSwitchState::HardBlocked => Err(ConnectivityError::KillSwitchHardBlocked),
        KillSwitchState::SoftBlocked => Err(ConnectivityError::ToggleNoOp("blocked".into())),
        KillSwitchState::Unblocked => Ok(()),
    }
}

/// Checks a software unblock request against the current state.
pub fn validate_unblock(state: KillSwitchState) -> Result<()> {
    match state {
        KillSwitchState::NotAvailable => Err(ConnectivityError::ToggleUnavailable),
        KillSwitchState::HardBlocked => {
            error!("Killswitch is hard blocked");
            Err(ConnectivityError::KillSwitchHardBlocked)
        }
        KillSwitchState::Unblocked => Err(ConnectivityError::ToggleNoOp("unblocked".into())),
        KillSwitchState::SoftBlocked => Ok(()),
    }
}

/// Enabling a radio is unblocking its switch.
pub fn validate_set_enabled(state: KillSwitchState, enabled: bool) -> Result<()> {
    if enabled {
        validate_unblock(state)
    } else {
        validate_block(state)
    }
}

pub fn validate_flight_mode(current: bool, requested: bool) -> Result<()> {
    if current == requested {
        let state = if current { "in flight mode" } else { "out of flight mode" };
        return Err(ConnectivityError::ToggleNoOp(state.into()));
    }
    Ok(())
}

/// Last observed URfkill state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillSwitchModel {
    state: KillSwitchState,
    flight_mode: bool,
}

impl Default for KillSwitchModel {
    fn default() -> Self {
        Self {
            state: KillSwitchState::NotAvailable,
            flight_mode: false,
        }
    }
}

impl KillSwitchModel {
    pub fn state(&self) -> KillSwitchState {
        self.state
    }

    pub fn flight_mode(&self) -> bool {
        self.flight_mode
    }

    /// Records the raw `state` property. Returns the new state if it changed.
    pub fn set_raw_state(&mut self, raw: i32) -> Option<KillSwitchState> {
        let state = KillSwitchState::from(raw);
        if state == self.state {
            return None;
        }
        debug!("Kill switch: {} -> {state}", self.state);
        self.state = state;
        Some(state)
    }

    /// Records a `FlightModeChanged` value. Returns whether it changed.
    pub fn set_flight_mode(&mut self, flight_mode: bool) -> bool {
        if flight_mode == self.flight_mode {
            return false;
        }
        self.flight_mode = flight_mode;
        true
    }
}
