//! URfkill-backed kill switch, Wi-Fi toggle and flight-mode toggle.

use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::Connection;

use crate::Result;
use crate::api::models::{ConnectivityError, KillSwitchState};
use crate::core::kill_switch::{
    KillSwitchModel, validate_block, validate_flight_mode, validate_set_enabled,
    validate_unblock,
};
use crate::core::property_watcher::PropertyWatcher;
use crate::core::signal::Signal;
use crate::dbus::{URfkillKillswitchProxy, URfkillProxy};
use crate::types::constants::urfkill;
use crate::util::variant::PropertyValue;

const WIRELESS_ENABLED: &str = "WirelessEnabled";

/// Changes observed on URfkill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchEvent {
    StateChanged(KillSwitchState),
    FlightModeChanged(bool),
}

struct Shared {
    urfkill: URfkillProxy<'static>,
    killswitch: URfkillKillswitchProxy<'static>,
    model: Mutex<KillSwitchModel>,
    events: Signal<KillSwitchEvent>,
}

impl Shared {
    fn model(&self) -> KillSwitchModel {
        self.model.lock().map(|m| *m).unwrap_or_default()
    }

    fn apply_state(&self, raw: i32) {
        let changed = self.model.lock().ok().and_then(|mut m| m.set_raw_state(raw));
        if let Some(state) = changed {
            self.events.emit(KillSwitchEvent::StateChanged(state));
        }
    }

    fn apply_flight_mode(&self, flight_mode: bool) {
        let changed = self
            .model
            .lock()
            .map(|mut m| m.set_flight_mode(flight_mode))
            .unwrap_or(false);
        if changed {
            info!("Flight mode {}", if flight_mode { "on" } else { "off" });
            self.events.emit(KillSwitchEvent::FlightModeChanged(flight_mode));
        }
    }

    async fn reload(&self) {
        match self.killswitch.state().await {
            Ok(raw) => self.apply_state(raw),
            Err(e) => {
                debug!("WLAN kill switch not available: {e}");
                self.apply_state(-1);
            }
        }
        match self.urfkill.is_flight_mode().await {
            Ok(flight_mode) => self.apply_flight_mode(flight_mode),
            Err(e) => debug!("Flight mode not available: {e}"),
        }
    }
}

/// The WLAN kill switch and global flight mode, as tracked by URfkill.
///
/// State changes only ever come from URfkill's signals; [`block`](Self::block)
/// and friends request a software transition and return once URfkill has
/// accepted it.
#[derive(Clone)]
pub struct KillSwitch {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("model", &self.shared.model())
            .finish()
    }
}

impl KillSwitch {
    pub async fn new(conn: &Connection) -> Result<Self> {
        let urfkill = URfkillProxy::new(conn).await?;
        let killswitch = URfkillKillswitchProxy::builder(conn)
            .path(urfkill::WLAN_KILLSWITCH_PATH)?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;

        // Subscribe to signals FIRST to avoid race condition
        let mut state_changes = killswitch.receive_killswitch_state_changed().await?;
        let mut flight_changes = urfkill.receive_flight_mode_changed().await?;
        let mut owners = urfkill.inner().receive_owner_changed().await?;

        let shared = Arc::new(Shared {
            urfkill,
            killswitch,
            model: Mutex::new(KillSwitchModel::default()),
            events: Signal::new(),
        });
        shared.reload().await;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_shared = shared.clone();
        tokio::spawn(async move {
            let shared = task_shared;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    signal = state_changes.next() => match signal {
                        Some(_) => match shared.killswitch.state().await {
                            Ok(raw) => shared.apply_state(raw),
                            Err(e) => warn!("Failed to read kill switch state: {e}"),
                        },
                        None => break,
                    },
                    signal = flight_changes.next() => match signal {
                        Some(signal) => match signal.args() {
                            Ok(args) => shared.apply_flight_mode(args.flight_mode),
                            Err(e) => warn!("Malformed FlightModeChanged: {e}"),
                        },
                        None => break,
                    },
                    owner = owners.next() => match owner {
                        Some(Some(_)) => shared.reload().await,
                        Some(None) => {
                            debug!("URfkill went away");
                            shared.apply_state(-1);
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        })
    }

    pub fn state(&self) -> KillSwitchState {
        self.shared.model().state()
    }

    pub fn is_available(&self) -> bool {
        self.state() != KillSwitchState::NotAvailable
    }

    pub fn flight_mode(&self) -> bool {
        self.shared.model().flight_mode()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<KillSwitchEvent> {
        self.shared.events.subscribe()
    }

    async fn request_block(&self, block: bool) -> Result<()> {
        let accepted = self
            .shared
            .urfkill
            .block(urfkill::DEVICE_TYPE_WLAN, block)
            .await?;
        if !accepted {
            return Err(ConnectivityError::Refused("URfkill".into()));
        }
        Ok(())
    }

    /// Soft-blocks the WLAN radio.
    pub async fn block(&self) -> Result<()> {
        validate_block(self.state())?;
        self.request_block(true).await
    }

    /// Lifts the software block. Fails while the switch is hard blocked.
    pub async fn unblock(&self) -> Result<()> {
        validate_unblock(self.state())?;
        self.request_block(false).await
    }

    pub async fn set_flight_mode(&self, enabled: bool) -> Result<()> {
        validate_flight_mode(self.flight_mode(), enabled)?;
        if !self.shared.urfkill.flight_mode(enabled).await? {
            return Err(ConnectivityError::Refused("URfkill".into()));
        }
        Ok(())
    }
}

/// Wi-Fi on/off switch.
///
/// Backed by the URfkill kill switch when one exists, otherwise by
/// NetworkManager's `WirelessEnabled`.
#[derive(Debug, Clone)]
pub enum WifiToggle {
    Urfkill {
        kill_switch: KillSwitch,
        network_manager: PropertyWatcher,
    },
    NetworkManager {
        network_manager: PropertyWatcher,
    },
}

impl WifiToggle {
    /// Picks the backend: URfkill if its WLAN switch is available.
    pub fn new(kill_switch: KillSwitch, network_manager: PropertyWatcher) -> Self {
        if kill_switch.is_available() {
            Self::Urfkill {
                kill_switch,
                network_manager,
            }
        } else {
            debug!("No URfkill WLAN switch, toggling Wi-Fi through NetworkManager");
            Self::NetworkManager { network_manager }
        }
    }

    fn wireless_enabled(network_manager: &PropertyWatcher) -> bool {
        network_manager
            .get(WIRELESS_ENABLED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn state(&self) -> KillSwitchState {
        match self {
            Self::Urfkill { kill_switch, .. } => kill_switch.state(),
            Self::NetworkManager { network_manager } => {
                if Self::wireless_enabled(network_manager) {
                    KillSwitchState::Unblocked
                } else {
                    KillSwitchState::SoftBlocked
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == KillSwitchState::Unblocked
    }

    /// Turns Wi-Fi on or off. Requests that would not change anything, or
    /// that try to lift a hard block, fail without touching the bus.
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        validate_set_enabled(self.state(), enabled)?;
        match self {
            Self::Urfkill {
                kill_switch,
                network_manager,
            } => {
                if enabled {
                    kill_switch.unblock().await?;
                } else {
                    kill_switch.block().await?;
                }
                network_manager.set(WIRELESS_ENABLED, PropertyValue::Bool(enabled));
            }
            Self::NetworkManager { network_manager } => {
                network_manager.set(WIRELESS_ENABLED, PropertyValue::Bool(enabled));
            }
        }
        Ok(())
    }
}

/// Flight-mode switch. `Null` stands in when URfkill is absent.
#[derive(Debug, Clone)]
pub enum FlightModeToggle {
    Urfkill(KillSwitch),
    Null,
}

impl FlightModeToggle {
    /// `Null` when URfkill has no WLAN switch to offer.
    pub fn new(kill_switch: KillSwitch) -> Self {
        if kill_switch.is_available() {
            Self::Urfkill(kill_switch)
        } else {
            debug!("No URfkill, flight mode unavailable");
            Self::Null
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Urfkill(_))
    }

    pub fn is_flight_mode(&self) -> bool {
        match self {
            Self::Urfkill(kill_switch) => kill_switch.flight_mode(),
            Self::Null => false,
        }
    }

    pub async fn set_flight_mode(&self, enabled: bool) -> Result<()> {
        match self {
            Self::Urfkill(kill_switch) => kill_switch.set_flight_mode(enabled).await,
            Self::Null => Err(ConnectivityError::ToggleUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_flight_mode_rejects_everything() {
        let toggle = FlightModeToggle::Null;
        assert!(!toggle.is_valid());
        assert!(!toggle.is_flight_mode());
        assert!(matches!(
            toggle.set_flight_mode(true).await,
            Err(ConnectivityError::ToggleUnavailable)
        ));
    }
}
