//! State of one Wi-Fi device.

use log::debug;

use crate::Result;
use crate::api::models::{KillSwitchState, LinkStatus};
use crate::core::access_point::{AccessPoint, AccessPointKey, GroupedAccessPoint};
use crate::core::grouper::{AccessPointGrouper, GroupChange};
use crate::core::link::{LinkInfo, WifiLink, set_status, wifi_status};
use crate::types::constants::device_state;

/// Everything the registry knows about a Wi-Fi device.
///
/// Owns the device's [`AccessPointGrouper`]; the active access point is
/// stored by raw object path and resolved to its group on read, so it
/// follows group churn automatically.
#[derive(Debug)]
pub struct WifiLinkState {
    info: LinkInfo,
    device_state: u32,
    kill_switch: KillSwitchState,
    connecting: bool,
    active_access_point: Option<String>,
    available_connections: Vec<String>,
    grouper: AccessPointGrouper,
}

impl WifiLinkState {
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        kill_switch: KillSwitchState,
    ) -> Self {
        let status = wifi_status(device_state::UNKNOWN, kill_switch, false);
        Self {
            info: LinkInfo::new(path, name, status),
            device_state: device_state::UNKNOWN,
            kill_switch,
            connecting: false,
            active_access_point: None,
            available_connections: Vec::new(),
            grouper: AccessPointGrouper::new(),
        }
    }

    pub(crate) fn info_mut(&mut self) -> &mut LinkInfo {
        &mut self.info
    }

    pub fn status(&self) -> LinkStatus {
        self.info.status
    }

    fn recompute(&mut self) -> Option<LinkStatus> {
        let status = wifi_status(self.device_state, self.kill_switch, self.connecting);
        if matches!(status, LinkStatus::Disabled | LinkStatus::Offline) {
            // Idle devices have no active network.
            self.active_access_point = None;
        }
        set_status(&mut self.info, status)
    }

    /// Feeds a new device state. Returns the new status if it changed.
    pub fn set_device_state(&mut self, state: u32) -> Option<LinkStatus> {
        self.device_state = state;
        self.recompute()
    }

    /// Feeds a new kill-switch state. Returns the new status if it changed.
    pub fn set_kill_switch(&mut self, state: KillSwitchState) -> Option<LinkStatus> {
        self.kill_switch = state;
        self.recompute()
    }

    /// Marks the start or end of a connection attempt started by us.
    /// Saved connections NetworkManager considers usable on this device.
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

    pub fn set_connecting(&mut self, connecting: bool) -> Option<LinkStatus> {
        self.connecting = connecting;
        self.recompute()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    /// Records the device's `ActiveAccessPoint`. `/` clears it. Returns
    /// whether the value changed.
    pub fn set_active_access_point(&mut self, path: &str) -> bool {
        let next = (path != "/" && !path.is_empty()).then(|| path.to_owned());
        if next == self.active_access_point {
            return false;
        }
        debug!("{}: active access point is now {path}", self.info.name);
        self.active_access_point = next;
        true
    }

    /// The group containing the active raw access point.
    pub fn active_access_point(&self) -> Option<&GroupedAccessPoint> {
        self.active_access_point
            .as_deref()
            .and_then(|path| self.grouper.group_of(path))
    }

    pub fn add_access_point(&mut self, ap: AccessPoint) -> Result<GroupChange> {
        self.grouper.add(ap)
    }

    pub fn remove_access_point(&mut self, path: &str) -> GroupChange {
        self.grouper.remove(path)
    }

    pub fn update_strength(&mut self, path: &str, strength: u8) -> GroupChange {
        self.grouper.update_strength(path, strength)
    }

    pub fn update_last_connected(&mut self, path: &str, timestamp: u64) -> GroupChange {
        self.grouper.update_last_connected(path, timestamp)
    }

    pub fn has_access_point(&self, path: &str) -> bool {
        self.grouper.contains(path)
    }

    pub fn group(&self, key: &AccessPointKey) -> Option<&GroupedAccessPoint> {
        self.grouper.get(key)
    }

    pub fn access_points(&self) -> Vec<GroupedAccessPoint> {
        self.grouper.groups().map(|(_, g)| g.clone()).collect()
    }

    pub fn snapshot(&self) -> WifiLink {
        WifiLink {
            info: self.info.clone(),
            access_points: self.access_points(),
            active_access_point: self.active_access_point().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::constants::wifi_mode;

    fn ap(path: &str, ssid: &str, strength: u8) -> AccessPoint {
        AccessPoint::new(path, ssid.as_bytes(), 0x100, wifi_mode::INFRA, strength)
    }

    #[test]
    fn kill_switch_decides_disabled_vs_offline() {
        let mut link = WifiLinkState::new("/dev/2", "wlan0", KillSwitchState::Unblocked);
        assert_eq!(link.status(), LinkStatus::Offline);
        assert_eq!(
            link.set_kill_switch(KillSwitchState::SoftBlocked),
            Some(LinkStatus::Disabled)
        );
        assert_eq!(
            link.set_kill_switch(KillSwitchState::Unblocked),
            Some(LinkStatus::Offline)
        );
    }

    #[test]
    fn available_connections_change_only_when_different() {
        let mut link = WifiLinkState::new("/dev/2", "wlan0", KillSwitchState::Unblocked);
        assert!(link.available_connections().is_empty());
        assert!(link.set_available_connections(vec!["/settings/3".into()]));
        assert!(!link.set_available_connections(vec!["/settings/3".into()]));
        assert_eq!(link.available_connections(), ["/settings/3".to_string()]);
    }

    #[test]
    fn connecting_masks_disconnected_state() {
        let mut link = WifiLinkState::new("/dev/2", "wlan0", KillSwitchState::Unblocked);
        link.set_connecting(true);
        assert_eq!(link.set_device_state(device_state::DISCONNECTED), Some(LinkStatus::Connecting));
        assert_eq!(link.set_connecting(false), Some(LinkStatus::Offline));
    }

    #[test]
    fn active_access_point_resolves_to_group() {
        let mut link = WifiLinkState::new("/dev/2", "wlan0", KillSwitchState::Unblocked);
        link.add_access_point(ap("/ap/1", "Home", 40)).unwrap();
        link.add_access_point(ap("/ap/2", "Home", 80)).unwrap();
        link.set_device_state(device_state::ACTIVATED);
        assert!(link.set_active_access_point("/ap/1"));
        assert_eq!(link.active_access_point().unwrap().strength(), 80);

        let snapshot = link.snapshot();
        assert_eq!(snapshot.info.status, LinkStatus::Online);
        assert_eq!(snapshot.access_points.len(), 1);
        assert!(snapshot.active_access_point.is_some());
    }

    #[test]
    fn going_idle_clears_active_access_point() {
        let mut link = WifiLinkState::new("/dev/2", "wlan0", KillSwitchState::Unblocked);
        link.add_access_point(ap("/ap/1", "Home", 40)).unwrap();
        link.set_device_state(device_state::ACTIVATED);
        link.set_active_access_point("/ap/1");
        link.set_device_state(device_state::DISCONNECTED);
        assert!(link.active_access_point().is_none());
        assert!(!link.set_active_access_point("/"));
    }
}
