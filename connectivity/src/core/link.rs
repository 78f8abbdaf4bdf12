//! Links: the network interfaces NetworkManager reports.
//!
//! [`Link`] is the read-only snapshot handed to consumers. The mutable
//! per-device state lives in [`LinkState`] and is only touched by the link
//! registry.

use crate::api::models::{
    Characteristics, KillSwitchState, LinkStatus, LinkType, NetworkingStatus,
};
use crate::core::access_point::GroupedAccessPoint;
use crate::core::wifi::WifiLinkState;
use crate::types::constants::{device_state, nm_state};
use crate::util::variant::PropertyValue;

/// Maps a Wi-Fi device state to a link status.
///
/// While a connection attempt started by this process is in flight the
/// transient DISCONNECTED/DEACTIVATING states are reported as connecting.
pub fn wifi_status(state: u32, kill_switch: KillSwitchState, connecting: bool) -> LinkStatus {
    let idle = || {
        if kill_switch.is_blocked() {
            LinkStatus::Disabled
        } else {
            LinkStatus::Offline
        }
    };
    match state {
        device_state::DISCONNECTED | device_state::DEACTIVATING if connecting => {
            LinkStatus::Connecting
        }
        device_state::DISCONNECTED | device_state::DEACTIVATING => idle(),
        device_state::PREPARE
        | device_state::CONFIG
        | device_state::NEED_AUTH
        | device_state::IP_CONFIG
        | device_state::IP_CHECK => LinkStatus::Connecting,
        device_state::SECONDARIES => LinkStatus::Connected,
        device_state::ACTIVATED => LinkStatus::Online,
        _ => idle(),
    }
}

/// Maps an Ethernet device state to a link status.
pub fn wired_status(state: u32) -> LinkStatus {
    match state {
        device_state::DISCONNECTED | device_state::DEACTIVATING | device_state::FAILED => {
            LinkStatus::Offline
        }
        device_state::PREPARE
        | device_state::CONFIG
        | device_state::NEED_AUTH
        | device_state::IP_CONFIG
        | device_state::IP_CHECK => LinkStatus::Connecting,
        device_state::SECONDARIES | device_state::ACTIVATED => LinkStatus::Connected,
        _ => LinkStatus::Disabled,
    }
}

/// Maps a modem device state to a link status.
pub fn cellular_status(state: u32) -> LinkStatus {
    match state {
        device_state::ACTIVATED => LinkStatus::Online,
        other => wired_status(other),
    }
}

/// Maps NetworkManager's global `State` property.
pub fn networking_status_from_nm_state(state: u32) -> NetworkingStatus {
    match state {
        nm_state::CONNECTING => NetworkingStatus::Connecting,
        nm_state::CONNECTED_LOCAL | nm_state::CONNECTED_SITE | nm_state::CONNECTED_GLOBAL => {
            NetworkingStatus::Online
        }
        _ => NetworkingStatus::Offline,
    }
}

/// Attributes shared by every link variant.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    /// NetworkManager device object path.
    pub path: String,
    /// Kernel interface name, e.g. `wlan0`.
    pub name: String,
    pub status: LinkStatus,
    pub characteristics: Characteristics,
}

impl LinkInfo {
    pub fn new(path: impl Into<String>, name: impl Into<String>, status: LinkStatus) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            status,
            characteristics: Characteristics::empty(),
        }
    }
}

/// Snapshot of a Wi-Fi link.
#[derive(Debug, Clone, PartialEq)]
pub struct WifiLink {
    pub info: LinkInfo,
    /// One entry per logical network, ordered by grouping key.
    pub access_points: Vec<GroupedAccessPoint>,
    pub active_access_point: Option<GroupedAccessPoint>,
}

/// Snapshot of an Ethernet link.
#[derive(Debug, Clone, PartialEq)]
pub struct WiredLink {
    pub info: LinkInfo,
    /// Saved connection paths NetworkManager considers usable on the device.
    pub available_connections: Vec<String>,
}

/// Snapshot of a cellular link.
#[derive(Debug, Clone, PartialEq)]
pub struct CellularLink {
    pub info: LinkInfo,
    /// The oFono modem path backing this device, if the driver is oFono.
    pub modem: Option<String>,
}

/// A network interface, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    Wifi(WifiLink),
    Wired(WiredLink),
    Cellular(CellularLink),
}

impl Link {
    pub fn link_type(&self) -> LinkType {
        match self {
            Self::Wifi(_) => LinkType::Wifi,
            Self::Wired(_) => LinkType::Wired,
            Self::Cellular(_) => LinkType::Cellular,
        }
    }

    pub fn info(&self) -> &LinkInfo {
        match self {
            Self::Wifi(l) => &l.info,
            Self::Wired(l) => &l.info,
            Self::Cellular(l) => &l.info,
        }
    }

    pub fn path(&self) -> &str {
        &self.info().path
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn status(&self) -> LinkStatus {
        self.info().status
    }

    pub fn characteristics(&self) -> Characteristics {
        self.info().characteristics
    }
}

/// Mutable state of an Ethernet device.
#[derive(Debug, Clone)]
pub struct WiredLinkState {
    info: LinkInfo,
    available_connections: Vec<String>,
}

impl WiredLinkState {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: LinkInfo::new(path, name, LinkStatus::Disabled),
            available_connections: Vec::new(),
        }
    }

    pub fn set_device_state(&mut self, state: u32) -> Option<LinkStatus> {
        set_status(&mut self.info, wired_status(state))
    }

    pub fn set_available_connections(&mut self, paths: Vec<String>) -> bool {
        if self.available_connections == paths {
            return false;
        }
        self.available_connections = paths;
        true
    }

    pub fn available_connections(&self) -> &[String] {
        &self.available_connections
    }

    pub fn snapshot(&self) -> WiredLink {
        WiredLink {
            info: self.info.clone(),
            available_connections: self.available_connections.clone(),
        }
    }
}

/// Mutable state of a modem device.
#[derive(Debug, Clone)]
pub struct CellularLinkState {
    info: LinkInfo,
    modem: Option<String>,
}

impl CellularLinkState {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: LinkInfo::new(path, name, LinkStatus::Disabled),
            modem: None,
        }
    }

    pub fn set_device_state(&mut self, state: u32) -> Option<LinkStatus> {
        set_status(&mut self.info, cellular_status(state))
    }

    /// Binds the link to an oFono modem. Only devices driven by oFono carry
    /// one; for them the NetworkManager `Udi` is the modem path.
    pub fn bind_modem(&mut self, driver: &str, udi: &str) {
        self.modem = (driver == "ofono" && !udi.is_empty()).then(|| udi.to_owned());
    }

    pub fn modem(&self) -> Option<&str> {
        self.modem.as_deref()
    }

    pub fn snapshot(&self) -> CellularLink {
        CellularLink {
            info: self.info.clone(),
            modem: self.modem.clone(),
        }
    }
}

/// What a device property update changed on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkUpdate {
    pub status: Option<LinkStatus>,
    pub name: bool,
    pub details: bool,
}

impl LinkUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && !self.name && !self.details
    }
}

/// Mutable state of one tracked device.
#[derive(Debug)]
pub enum LinkState {
    Wifi(WifiLinkState),
    Wired(WiredLinkState),
    Cellular(CellularLinkState),
}

impl LinkState {
    fn info_mut(&mut self) -> &mut LinkInfo {
        match self {
            Self::Wifi(l) => l.info_mut(),
            Self::Wired(l) => &mut l.info,
            Self::Cellular(l) => &mut l.info,
        }
    }

    /// Applies one property of `org.freedesktop.NetworkManager.Device`.
    pub fn apply_device_property(&mut self, name: &str, value: &PropertyValue) -> LinkUpdate {
        let mut update = LinkUpdate::default();
        match name {
            "State" => {
                if let Some(state) = value.as_u32() {
                    update.status = match self {
                        Self::Wifi(l) => l.set_device_state(state),
                        Self::Wired(l) => l.set_device_state(state),
                        Self::Cellular(l) => l.set_device_state(state),
                    };
                }
            }
            "Interface" => {
                if let Some(iface) = value.as_str() {
                    let info = self.info_mut();
                    if info.name != iface {
                        info.name = iface.to_owned();
                        update.name = true;
                    }
                }
            }
            "AvailableConnections" => {
                let Some(paths) = value.as_str_list() else {
                    return update;
                };
                match self {
                    Self::Wired(l) => update.details = l.set_available_connections(paths.to_vec()),
                    // Only consulted when connecting, nothing to publish.
                    Self::Wifi(l) => {
                        l.set_available_connections(paths.to_vec());
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        update
    }

    pub fn snapshot(&self) -> Link {
        match self {
            Self::Wifi(l) => Link::Wifi(l.snapshot()),
            Self::Wired(l) => Link::Wired(l.snapshot()),
            Self::Cellular(l) => Link::Cellular(l.snapshot()),
        }
    }
}

pub(crate) fn set_status(info: &mut LinkInfo, status: LinkStatus) -> Option<LinkStatus> {
    if info.status == status {
        return None;
    }
    info.status = status;
    Some(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_idle_states_follow_kill_switch() {
        for state in [
            device_state::UNKNOWN,
            device_state::UNMANAGED,
            device_state::UNAVAILABLE,
            device_state::FAILED,
        ] {
            assert_eq!(
                wifi_status(state, KillSwitchState::SoftBlocked, false),
                LinkStatus::Disabled
            );
            assert_eq!(
                wifi_status(state, KillSwitchState::HardBlocked, true),
                LinkStatus::Disabled
            );
            assert_eq!(
                wifi_status(state, KillSwitchState::Unblocked, false),
                LinkStatus::Offline
            );
            assert_eq!(
                wifi_status(state, KillSwitchState::NotAvailable, false),
                LinkStatus::Offline
            );
        }
    }

    #[test]
    fn wifi_disconnect_while_connecting_is_connecting() {
        assert_eq!(
            wifi_status(device_state::DISCONNECTED, KillSwitchState::Unblocked, true),
            LinkStatus::Connecting
        );
        assert_eq!(
            wifi_status(device_state::DEACTIVATING, KillSwitchState::Unblocked, false),
            LinkStatus::Offline
        );
    }

    #[test]
    fn wifi_activation_states() {
        let ks = KillSwitchState::Unblocked;
        for state in 40..=80 {
            if state % 10 == 0 {
                assert_eq!(wifi_status(state, ks, false), LinkStatus::Connecting);
            }
        }
        assert_eq!(wifi_status(device_state::SECONDARIES, ks, false), LinkStatus::Connected);
        assert_eq!(wifi_status(device_state::ACTIVATED, ks, false), LinkStatus::Online);
    }

    #[test]
    fn wired_and_cellular_differ_only_when_activated() {
        assert_eq!(wired_status(device_state::UNAVAILABLE), LinkStatus::Disabled);
        assert_eq!(wired_status(device_state::FAILED), LinkStatus::Offline);
        assert_eq!(wired_status(device_state::IP_CONFIG), LinkStatus::Connecting);
        assert_eq!(wired_status(device_state::ACTIVATED), LinkStatus::Connected);
        assert_eq!(cellular_status(device_state::ACTIVATED), LinkStatus::Online);
        assert_eq!(cellular_status(device_state::SECONDARIES), LinkStatus::Connected);
        assert_eq!(cellular_status(device_state::UNMANAGED), LinkStatus::Disabled);
    }

    #[test]
    fn global_state_mapping() {
        assert_eq!(networking_status_from_nm_state(40), NetworkingStatus::Connecting);
        for s in [50, 60, 70] {
            assert_eq!(networking_status_from_nm_state(s), NetworkingStatus::Online);
        }
        for s in [0, 10, 20, 30] {
            assert_eq!(networking_status_from_nm_state(s), NetworkingStatus::Offline);
        }
    }

    #[test]
    fn modem_bound_only_for_ofono_driver() {
        let mut link = CellularLinkState::new("/dev/3", "ril_0");
        link.bind_modem("ofono", "/ril_0");
        assert_eq!(link.modem(), Some("/ril_0"));
        link.bind_modem("qmi_wwan", "/sys/devices/usb1");
        assert_eq!(link.modem(), None);
    }

    #[test]
    fn device_properties_update_wired_link() {
        let mut link = LinkState::Wired(WiredLinkState::new("/dev/1", ""));
        let update = link.apply_device_property("Interface", &PropertyValue::from("eth0"));
        assert!(update.name);
        let update = link.apply_device_property("State", &PropertyValue::UInt32(100));
        assert_eq!(update.status, Some(LinkStatus::Connected));
        let update = link.apply_device_property("State", &PropertyValue::UInt32(100));
        assert!(update.is_empty());
        let update = link.apply_device_property(
            "AvailableConnections",
            &PropertyValue::PathList(vec!["/settings/1".into()]),
        );
        assert!(update.details);

        let Link::Wired(snapshot) = link.snapshot() else {
            panic!("expected a wired link");
        };
        assert_eq!(snapshot.info.name, "eth0");
        assert_eq!(snapshot.available_connections, vec!["/settings/1".to_string()]);
    }

    #[test]
    fn wifi_link_tracks_available_connections() {
        let mut link = LinkState::Wifi(WifiLinkState::new("/dev/2", "wlan0", KillSwitchState::Unblocked));
        let update = link.apply_device_property(
            "AvailableConnections",
            &PropertyValue::PathList(vec!["/settings/4".into(), "/settings/7".into()]),
        );
        assert!(update.is_empty());
        let LinkState::Wifi(wifi) = &link else {
            panic!("expected a wifi link");
        };
        assert_eq!(
            wifi.available_connections(),
            ["/settings/4".to_string(), "/settings/7".to_string()]
        );
    }
}
