//! Raw and grouped Wi-Fi access points.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;
use crate::api::models::ConnectivityError;
use crate::types::constants::wifi_mode;
use crate::util::utils::decode_ssid;
use crate::util::variant::PropertyValue;

/// The tuple raw access points are deduplicated on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessPointKey {
    pub ssid: Vec<u8>,
    pub security_flags: u32,
    pub mode: u32,
}

/// One scan result as reported by NetworkManager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    /// NetworkManager object path of the access point.
    pub path: String,
    pub raw_ssid: Vec<u8>,
    /// Best-effort decoding of `raw_ssid`.
    pub ssid: String,
    /// `WpaFlags | RsnFlags`.
    pub security_flags: u32,
    pub mode: u32,
    /// Signal strength, 0-100.
    pub strength: u8,
    /// Seconds since boot the access point was last seen, if ever.
    pub last_connected: Option<u64>,
}

impl AccessPoint {
    pub fn new(
        path: impl Into<String>,
        raw_ssid: impl Into<Vec<u8>>,
        security_flags: u32,
        mode: u32,
        strength: u8,
    ) -> Self {
        let raw_ssid = raw_ssid.into();
        Self {
            path: path.into(),
            ssid: decode_ssid(&raw_ssid),
            raw_ssid,
            security_flags,
            mode,
            strength,
            last_connected: None,
        }
    }

    /// Builds an access point from a property snapshot of
    /// `org.freedesktop.NetworkManager.AccessPoint`.
    pub fn from_properties(path: &str, props: &HashMap<String, PropertyValue>) -> Self {
        let u32_prop = |name: &str| props.get(name).and_then(PropertyValue::as_u32).unwrap_or(0);
        let raw_ssid = props
            .get("Ssid")
            .and_then(PropertyValue::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        let strength = props
            .get("Strength")
            .and_then(PropertyValue::as_u8)
            .unwrap_or(0)
            .min(100);
        let last_connected = props
            .get("LastSeen")
            .and_then(PropertyValue::as_i64)
            .and_then(|t| u64::try_from(t).ok());

        let mut ap = Self::new(
            path,
            raw_ssid,
            u32_prop("WpaFlags") | u32_prop("RsnFlags"),
            u32_prop("Mode"),
            strength,
        );
        ap.last_connected = last_connected;
        ap
    }

    pub fn key(&self) -> AccessPointKey {
        AccessPointKey {
            ssid: self.raw_ssid.clone(),
            security_flags: self.security_flags,
            mode: self.mode,
        }
    }

    pub fn secured(&self) -> bool {
        self.security_flags != 0
    }

    pub fn adhoc(&self) -> bool {
        self.mode != wifi_mode::INFRA
    }
}

/// One logical network made of one or more raw access points sharing a key.
///
/// `strength` is the maximum over the members. `last_connected` is the
/// maximum over every timestamp any member has ever reported, so it never
/// goes backwards, not even when members leave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedAccessPoint {
    members: Vec<AccessPoint>,
    strength: u8,
    last_connected: Option<u64>,
}

impl GroupedAccessPoint {
    pub fn new(ap: AccessPoint) -> Self {
        Self {
            strength: ap.strength,
            last_connected: ap.last_connected,
            members: vec![ap],
        }
    }

    /// Adds a member. A member with a path already in the group replaces the
    /// old entry.
    ///
    /// Merging an access point from a different network is rejected.
    pub fn add(&mut self, ap: AccessPoint) -> Result<()> {
        if let Some(first) = self.members.first()
            && first.raw_ssid != ap.raw_ssid
        {
            warn!(
                "Tried to merge two access points from different networks: {:?} and {:?}",
                first.ssid, ap.ssid
            );
            return Err(ConnectivityError::GroupingMismatch {
                existing: first.ssid.clone(),
                incoming: ap.ssid,
            });
        }

        self.last_connected = self.last_connected.max(ap.last_connected);
        match self.members.iter_mut().find(|m| m.path == ap.path) {
            Some(existing) => *existing = ap,
            None => self.members.push(ap),
        }
        self.recompute_strength();
        Ok(())
    }

    /// Removes a member by object path. Returns `false` if it was not a
    /// member.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.path != path);
        if self.members.len() == before {
            warn!("Tried to remove access point {path} which is not in the group");
            return false;
        }
        self.recompute_strength();
        true
    }

    /// Updates one member's strength. Returns whether the group's aggregate
    /// strength changed.
    pub fn update_strength(&mut self, path: &str, strength: u8) -> bool {
        let Some(member) = self.members.iter_mut().find(|m| m.path == path) else {
            return false;
        };
        member.strength = strength.min(100);
        self.recompute_strength()
    }

    /// Records a newer timestamp for a member. Returns whether the group's
    /// aggregate timestamp moved forward.
    pub fn update_last_connected(&mut self, path: &str, timestamp: u64) -> bool {
        let Some(member) = self.members.iter_mut().find(|m| m.path == path) else {
            return false;
        };
        member.last_connected = member.last_connected.max(Some(timestamp));
        if self.last_connected < Some(timestamp) {
            self.last_connected = Some(timestamp);
            return true;
        }
        false
    }

    fn recompute_strength(&mut self) -> bool {
        let strength = self.members.iter().map(|m| m.strength).max().unwrap_or(0);
        let changed = strength != self.strength;
        self.strength = strength;
        changed
    }

    pub fn has_object(&self, path: &str) -> bool {
        self.members.iter().any(|m| m.path == path)
    }

    /// The object path of the first member, or `/` for an empty group.
    pub fn object_path(&self) -> &str {
        self.members.first().map(|m| m.path.as_str()).unwrap_or("/")
    }

    pub fn strength(&self) -> u8 {
        self.strength
    }

    pub fn last_connected(&self) -> Option<u64> {
        self.last_connected
    }

    pub fn ssid(&self) -> &str {
        self.members.first().map(|m| m.ssid.as_str()).unwrap_or("")
    }

    pub fn raw_ssid(&self) -> &[u8] {
        self.members
            .first()
            .map(|m| m.raw_ssid.as_slice())
            .unwrap_or(&[])
    }

    pub fn secured(&self) -> bool {
        self.members.first().is_some_and(AccessPoint::secured)
    }

    pub fn adhoc(&self) -> bool {
        self.members.first().is_some_and(AccessPoint::adhoc)
    }

    pub fn members(&self) -> &[AccessPoint] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ap(path: &str, ssid: &str, strength: u8) -> AccessPoint {
        AccessPoint::new(path, ssid.as_bytes(), 0x188, wifi_mode::INFRA, strength)
    }

    #[test]
    fn from_properties_combines_security_flags() {
        let mut props = HashMap::new();
        props.insert("Ssid".to_string(), PropertyValue::Bytes(b"Home".to_vec()));
        props.insert("WpaFlags".to_string(), PropertyValue::UInt32(0x08));
        props.insert("RsnFlags".to_string(), PropertyValue::UInt32(0x100));
        props.insert("Mode".to_string(), PropertyValue::UInt32(2));
        props.insert("Strength".to_string(), PropertyValue::Byte(73));
        props.insert("LastSeen".to_string(), PropertyValue::Int32(1200));

        let ap = AccessPoint::from_properties("/ap/1", &props);
        assert_eq!(ap.ssid, "Home");
        assert_eq!(ap.security_flags, 0x108);
        assert!(ap.secured());
        assert!(!ap.adhoc());
        assert_eq!(ap.strength, 73);
        assert_eq!(ap.last_connected, Some(1200));
    }

    #[test]
    fn never_seen_access_point_has_no_timestamp() {
        let mut props = HashMap::new();
        props.insert("LastSeen".to_string(), PropertyValue::Int32(-1));
        props.insert("Mode".to_string(), PropertyValue::UInt32(wifi_mode::ADHOC));
        let ap = AccessPoint::from_properties("/ap/2", &props);
        assert_eq!(ap.last_connected, None);
        assert!(ap.adhoc());
        assert!(!ap.secured());
        assert_eq!(ap.ssid, "");
    }

    #[test]
    fn strength_is_max_of_members() {
        let mut group = GroupedAccessPoint::new(ap("/ap/1", "Home", 40));
        group.add(ap("/ap/2", "Home", 80)).unwrap();
        assert_eq!(group.strength(), 80);

        assert!(group.remove("/ap/2"));
        assert_eq!(group.strength(), 40);
        assert_eq!(group.object_path(), "/ap/1");
    }

    #[test]
    fn rejects_merge_of_different_ssids() {
        let mut group = GroupedAccessPoint::new(ap("/ap/1", "Home", 40));
        let err = group.add(ap("/ap/2", "Work", 90)).unwrap_err();
        assert!(matches!(err, ConnectivityError::GroupingMismatch { .. }));
        assert_eq!(group.len(), 1);
        assert_eq!(group.strength(), 40);
    }

    #[test]
    fn readding_same_path_replaces_member() {
        let mut group = GroupedAccessPoint::new(ap("/ap/1", "Home", 40));
        group.add(ap("/ap/1", "Home", 10)).unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group.strength(), 10);
    }

    #[test]
    fn last_connected_never_decreases() {
        let mut first = ap("/ap/1", "Home", 40);
        first.last_connected = Some(500);
        let mut group = GroupedAccessPoint::new(first);

        let mut second = ap("/ap/2", "Home", 60);
        second.last_connected = Some(900);
        group.add(second).unwrap();
        assert_eq!(group.last_connected(), Some(900));

        assert!(!group.update_last_connected("/ap/1", 700));
        assert_eq!(group.last_connected(), Some(900));

        group.remove("/ap/2");
        assert_eq!(group.last_connected(), Some(900));

        assert!(group.update_last_connected("/ap/1", 1000));
        assert_eq!(group.last_connected(), Some(1000));
    }

    #[test]
    fn strength_update_reports_aggregate_change_only() {
        let mut group = GroupedAccessPoint::new(ap("/ap/1", "Home", 40));
        group.add(ap("/ap/2", "Home", 80)).unwrap();
        assert!(!group.update_strength("/ap/1", 60));
        assert!(group.update_strength("/ap/2", 50));
        assert_eq!(group.strength(), 60);
        assert!(!group.update_strength("/ap/9", 100));
    }

    #[test]
    fn removing_unknown_member_is_reported() {
        let mut group = GroupedAccessPoint::new(ap("/ap/1", "Home", 40));
        assert!(!group.remove("/ap/7"));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn empty_group_reports_root_path() {
        let mut group = GroupedAccessPoint::new(ap("/ap/1", "Home", 40));
        group.remove("/ap/1");
        assert!(group.is_empty());
        assert_eq!(group.object_path(), "/");
        assert_eq!(group.strength(), 0);
    }
}
