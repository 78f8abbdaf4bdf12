//! Configured VPN connections.
//!
//! A VPN definition is a saved NetworkManager connection with
//! `connection.type == "vpn"`. The plugin named by `vpn.service-type`
//! selects the protocol variant; only OpenVPN and PPTP are modelled.

pub mod openvpn;
pub mod pptp;

use log::debug;
use std::collections::{BTreeMap, HashMap};
use zvariant::Value;

use crate::Result;
use crate::api::models::{ActiveConnectionState, VpnType};
use crate::core::active_connections::ActiveConnection;
use crate::types::constants::setting;
use crate::util::variant::{
    SettingsMap, set_setting, setting_bool, setting_str, setting_string_map,
};

pub use openvpn::OpenVpnSettings;
pub use pptp::PptpSettings;

/// Protocol-specific properties of a VPN definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpnSettings {
    OpenVpn(OpenVpnSettings),
    Pptp(PptpSettings),
}

impl VpnSettings {
    /// Empty properties for a freshly created connection.
    pub fn default_for(kind: VpnType) -> Self {
        match kind {
            VpnType::OpenVpn => Self::OpenVpn(OpenVpnSettings::default()),
            VpnType::Pptp => Self::Pptp(PptpSettings::default()),
        }
    }

    pub fn kind(&self) -> VpnType {
        match self {
            Self::OpenVpn(_) => VpnType::OpenVpn,
            Self::Pptp(_) => VpnType::Pptp,
        }
    }

    fn from_maps(
        kind: VpnType,
        data: &HashMap<String, String>,
        secrets: &HashMap<String, String>,
    ) -> Self {
        match kind {
            VpnType::OpenVpn => Self::OpenVpn(OpenVpnSettings::from_maps(data, secrets)),
            VpnType::Pptp => Self::Pptp(PptpSettings::from_maps(data, secrets)),
        }
    }

    pub fn to_data(&self) -> HashMap<String, String> {
        match self {
            Self::OpenVpn(s) => s.to_data(),
            Self::Pptp(s) => s.to_data(),
        }
    }

    pub fn to_secrets(&self) -> HashMap<String, String> {
        match self {
            Self::OpenVpn(s) => s.to_secrets(),
            Self::Pptp(s) => s.to_secrets(),
        }
    }
}

/// Activation state of a VPN definition, derived from the active
/// connection created from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VpnActivation {
    /// No active connection refers to this definition.
    #[default]
    Inactive,
    Activating,
    Activated,
    Deactivating,
    Deactivated,
}

impl From<ActiveConnectionState> for VpnActivation {
    fn from(state: ActiveConnectionState) -> Self {
        match state {
            ActiveConnectionState::Activating => Self::Activating,
            ActiveConnectionState::Activated => Self::Activated,
            ActiveConnectionState::Deactivating => Self::Deactivating,
            ActiveConnectionState::Deactivated => Self::Deactivated,
            ActiveConnectionState::Unknown | ActiveConnectionState::Other(_) => Self::Inactive,
        }
    }
}

impl VpnActivation {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Activating | Self::Activated)
    }

    /// Transitional states during which no other VPN may be started.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Activating | Self::Deactivating | Self::Deactivated
        )
    }
}

/// One configured VPN connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnConnection {
    /// Saved connection object path.
    pub path: String,
    pub uuid: String,
    pub id: String,
    /// `ipv4.never-default`: do not route all traffic through the tunnel.
    pub never_default: bool,
    pub settings: VpnSettings,
    pub activation: VpnActivation,
    /// The active connection created from this definition, if any.
    pub active_connection: Option<String>,
    pub activatable: bool,
}

impl VpnConnection {
    /// Parses a `GetSettings` reply.
    ///
    /// Returns `None` for non-VPN connections and for VPN plugins that are
    /// not modelled.
    pub fn from_settings(path: &str, settings: &SettingsMap) -> Option<Self> {
        if setting_str(settings, setting::CONNECTION, "type").as_deref() != Some(setting::VPN_TYPE)
        {
            return None;
        }
        let service = setting_str(settings, setting::VPN, "service-type").unwrap_or_default();
        let Some(kind) = VpnType::from_service_type(&service) else {
            debug!("Skipping VPN connection {path} with unsupported service type {service:?}");
            return None;
        };

        let data = setting_string_map(settings, setting::VPN, "data");
        let secrets = setting_string_map(settings, setting::VPN, "secrets");
        Some(Self {
            path: path.to_owned(),
            uuid: setting_str(settings, setting::CONNECTION, "uuid").unwrap_or_default(),
            id: setting_str(settings, setting::CONNECTION, "id").unwrap_or_default(),
            never_default: setting_bool(settings, setting::IPV4, "never-default")
                .unwrap_or(false),
            settings: VpnSettings::from_maps(kind, &data, &secrets),
            activation: VpnActivation::Inactive,
            active_connection: None,
            activatable: false,
        })
    }

    pub fn kind(&self) -> VpnType {
        self.settings.kind()
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    pub fn is_busy(&self) -> bool {
        self.activation.is_busy()
    }

    /// Writes this definition's editable fields over an existing settings
    /// map, leaving unrelated sections untouched.
    pub fn merge_into(&self, settings: &mut SettingsMap) -> Result<()> {
        set_setting(settings, setting::CONNECTION, "id", self.id.as_str())?;
        set_setting(
            settings,
            setting::VPN,
            "service-type",
            self.kind().service_type(),
        )?;
        set_setting(settings, setting::VPN, "data", Value::from(self.settings.to_data()))?;
        let secrets = self.settings.to_secrets();
        if !secrets.is_empty() {
            set_setting(settings, setting::VPN, "secrets", Value::from(secrets))?;
        }
        set_setting(settings, setting::IPV4, "never-default", self.never_default)?;
        Ok(())
    }
}

/// Settings for a brand new VPN connection named `VPN connection <n>`.
pub fn new_connection_settings(kind: VpnType, number: u64, uuid: &str) -> Result<SettingsMap> {
    let mut settings = SettingsMap::new();
    set_setting(
        &mut settings,
        setting::CONNECTION,
        "id",
        format!("VPN connection {number}"),
    )?;
    set_setting(&mut settings, setting::CONNECTION, "uuid", uuid)?;
    set_setting(&mut settings, setting::CONNECTION, "type", setting::VPN_TYPE)?;
    set_setting(&mut settings, setting::VPN, "service-type", kind.service_type())?;
    set_setting(
        &mut settings,
        setting::VPN,
        "data",
        Value::from(VpnSettings::default_for(kind).to_data()),
    )?;
    set_setting(&mut settings, setting::IPV4, "method", "auto")?;
    Ok(settings)
}

/// Change notification from the VPN manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpnEvent {
    Added(String),
    Removed(String),
    /// Settings, activation or activatability of a connection changed.
    Updated(String),
}

/// Every configured VPN connection, keyed by saved connection path.
#[derive(Debug, Default)]
pub struct VpnConnectionSet {
    connections: BTreeMap<String, VpnConnection>,
}

impl VpnConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a definition. Activation state is preserved
    /// across refreshes.
    pub fn upsert(&mut self, mut conn: VpnConnection) -> Option<VpnEvent> {
        match self.connections.get_mut(&conn.path) {
            Some(existing) => {
                conn.activation = existing.activation;
                conn.active_connection = existing.active_connection.clone();
                conn.activatable = existing.activatable;
                let changed = *existing != conn;
                let uuid = conn.uuid.clone();
                *existing = conn;
                changed.then_some(VpnEvent::Updated(uuid))
            }
            None => {
                let uuid = conn.uuid.clone();
                self.connections.insert(conn.path.clone(), conn);
                Some(VpnEvent::Added(uuid))
            }
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<VpnEvent> {
        self.connections
            .remove(path)
            .map(|conn| VpnEvent::Removed(conn.uuid))
    }

    pub fn get(&self, path: &str) -> Option<&VpnConnection> {
        self.connections.get(path)
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&VpnConnection> {
        self.connections.values().find(|c| c.uuid == uuid)
    }

    pub fn snapshot(&self) -> Vec<VpnConnection> {
        self.connections.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Recomputes activation and activatability from the current active
    /// connections. Returns an `Updated` event per connection that changed.
    ///
    /// A connection is activatable when no *other* VPN is busy and either
    /// no VPN is active or the active one is this connection.
    pub fn update_activation(&mut self, active: &[ActiveConnection]) -> Vec<VpnEvent> {
        let before: Vec<_> = self
            .connections
            .values()
            .map(|c| (c.activation, c.active_connection.clone(), c.activatable))
            .collect();

        for conn in self.connections.values_mut() {
            match active.iter().find(|a| a.is_vpn() && a.connection == conn.path) {
                Some(ac) => {
                    conn.activation = VpnActivation::from(ac.state);
                    conn.active_connection = Some(ac.path.clone());
                }
                None => {
                    conn.activation = VpnActivation::Inactive;
                    conn.active_connection = None;
                }
            }
        }

        let active_path = self
            .connections
            .values()
            .find(|c| c.is_active())
            .map(|c| c.path.clone());
        let busy: Vec<String> = self
            .connections
            .values()
            .filter(|c| c.is_busy())
            .map(|c| c.path.clone())
            .collect();

        for conn in self.connections.values_mut() {
            let other_busy = busy.iter().any(|p| *p != conn.path);
            conn.activatable = !other_busy
                && active_path
                    .as_deref()
                    .is_none_or(|path| path == conn.path);
        }

        self.connections
            .values()
            .zip(before)
            .filter(|(c, (activation, ac, activatable))| {
                c.activation != *activation
                    || c.active_connection != *ac
                    || c.activatable != *activatable
            })
            .map(|(c, _)| VpnEvent::Updated(c.uuid.clone()))
            .collect()
    }
}
