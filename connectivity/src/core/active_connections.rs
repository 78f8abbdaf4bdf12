//! Correlation of NetworkManager's active-connection list with the wrappers
//! this crate keeps for each entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::api::models::{ActiveConnectionState, VpnConnectionState, VpnConnectionStateReason};
use crate::util::variant::PropertyValue;

/// Connection type tag NetworkManager uses for VPN connections.
pub const VPN_TYPE: &str = "vpn";

/// Fine-grained state of an active VPN connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveVpnConnection {
    pub state: VpnConnectionState,
    pub reason: VpnConnectionStateReason,
}

impl ActiveVpnConnection {
    pub fn new(state: VpnConnectionState) -> Self {
        Self {
            state,
            reason: VpnConnectionStateReason::Unknown,
        }
    }

    /// Whether activation ended without reaching the activated state.
    pub fn failed(&self) -> bool {
        matches!(
            self.state,
            VpnConnectionState::Failed | VpnConnectionState::Disconnected
        )
    }
}

/// One entry of NetworkManager's `ActiveConnections` list.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConnection {
    /// Object path of the active connection.
    pub path: String,
    pub id: String,
    pub uuid: String,
    /// Connection type, e.g. `802-11-wireless` or `vpn`.
    pub kind: String,
    pub state: ActiveConnectionState,
    /// Path of the saved connection this was activated from.
    pub connection: String,
    /// Access point for Wi-Fi, otherwise usually `/`.
    pub specific_object: String,
    /// Present while `kind` is `vpn`.
    pub vpn: Option<ActiveVpnConnection>,
}

/// What applying a property did to a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEffect {
    Unchanged,
    Updated,
    /// The connection became a VPN and needs VPN state tracking.
    BecameVpn,
    /// The connection stopped being a VPN.
    LeftVpn,
}

impl ActiveConnection {
    /// A wrapper whose properties have not been fetched yet.
    pub fn placeholder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id: String::new(),
            uuid: String::new(),
            kind: String::new(),
            state: ActiveConnectionState::Unknown,
            connection: "/".into(),
            specific_object: "/".into(),
            vpn: None,
        }
    }

    pub fn is_vpn(&self) -> bool {
        self.kind == VPN_TYPE
    }

    /// Applies a full property snapshot in name order.
    pub fn apply_all(&mut self, props: &HashMap<String, PropertyValue>) -> PropertyEffect {
        let mut names: Vec<_> = props.keys().collect();
        names.sort();
        let mut effect = PropertyEffect::Unchanged;
        for name in names {
            match self.apply(name, &props[name]) {
                PropertyEffect::Unchanged => {}
                PropertyEffect::Updated if effect == PropertyEffect::Unchanged => {
                    effect = PropertyEffect::Updated
                }
                PropertyEffect::Updated => {}
                other => effect = other,
            }
        }
        effect
    }

    /// Applies one property of `org.freedesktop.NetworkManager.Connection.Active`.
    pub fn apply(&mut self, name: &str, value: &PropertyValue) -> PropertyEffect {
        fn replace(slot: &mut String, value: Option<&str>) -> bool {
            match value {
                Some(v) if v != slot => {
                    *slot = v.to_owned();
                    true
                }
                _ => false,
            }
        }

        let changed = match name {
            "Id" => replace(&mut self.id, value.as_str()),
            "Uuid" => replace(&mut self.uuid, value.as_str()),
            "Connection" => replace(&mut self.connection, value.as_str()),
            "SpecificObject" => replace(&mut self.specific_object, value.as_str()),
            "State" => match value.as_u32().map(ActiveConnectionState::from) {
                Some(state) if state != self.state => {
                    self.state = state;
                    true
                }
                _ => false,
            },
            "Type" => {
                let was_vpn = self.is_vpn();
                if !replace(&mut self.kind, value.as_str()) {
                    return PropertyEffect::Unchanged;
                }
                return match (was_vpn, self.is_vpn()) {
                    (false, true) => {
                        self.vpn = Some(ActiveVpnConnection::new(VpnConnectionState::Unknown));
                        PropertyEffect::BecameVpn
                    }
                    (true, false) => {
                        self.vpn = None;
                        PropertyEffect::LeftVpn
                    }
                    _ => PropertyEffect::Updated,
                };
            }
            _ => false,
        };
        if changed {
            PropertyEffect::Updated
        } else {
            PropertyEffect::Unchanged
        }
    }

    /// Records a VPN state transition. Ignored for non-VPN connections.
    pub fn set_vpn_state(
        &mut self,
        state: VpnConnectionState,
        reason: VpnConnectionStateReason,
    ) -> bool {
        match self.vpn.as_mut() {
            Some(vpn) if vpn.state != state || vpn.reason != reason => {
                vpn.state = state;
                vpn.reason = reason;
                true
            }
            _ => false,
        }
    }
}

/// Paths added and removed by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Streaming per-change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveConnectionEvent {
    Added(String),
    Removed(String),
    /// A property of a tracked connection changed.
    Updated(String),
    VpnStateChanged {
        path: String,
        state: VpnConnectionState,
        reason: VpnConnectionStateReason,
    },
}

/// The set of tracked active connections, keyed by object path.
#[derive(Debug, Default)]
pub struct ActiveConnectionSet {
    connections: BTreeMap<String, ActiveConnection>,
}

impl ActiveConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings the tracked set in line with `paths`.
    ///
    /// Removed wrappers are dropped. New paths get a placeholder wrapper
    /// to be filled by the caller. Reconciling the same list twice yields
    /// an empty result the second time.
    pub fn reconcile(&mut self, paths: &[String]) -> Reconciliation {
        let wanted: BTreeSet<&str> = paths
            .iter()
            .map(String::as_str)
            .filter(|p| *p != "/")
            .collect();

        let removed: Vec<String> = self
            .connections
            .keys()
            .filter(|p| !wanted.contains(p.as_str()))
            .cloned()
            .collect();
        for path in &removed {
            self.connections.remove(path);
        }

        let mut added = Vec::new();
        for path in wanted {
            if !self.connections.contains_key(path) {
                self.connections
                    .insert(path.to_owned(), ActiveConnection::placeholder(path));
                added.push(path.to_owned());
            }
        }

        Reconciliation { added, removed }
    }

    pub fn get(&self, path: &str) -> Option<&ActiveConnection> {
        self.connections.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut ActiveConnection> {
        self.connections.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.connections.contains_key(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<ActiveConnection> {
        self.connections.remove(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ActiveConnection> {
        self.connections.values().cloned().collect()
    }

    /// The active connection created from a saved connection, if any.
    pub fn by_connection(&self, connection_path: &str) -> Option<&ActiveConnection> {
        self.connections
            .values()
            .find(|c| c.connection == connection_path)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reconcile_computes_symmetric_difference() {
        let mut set = ActiveConnectionSet::new();
        let first = set.reconcile(&paths(&["/ac/1", "/ac/2"]));
        assert_eq!(first.added, paths(&["/ac/1", "/ac/2"]));
        assert!(first.removed.is_empty());

        let second = set.reconcile(&paths(&["/ac/2", "/ac/3"]));
        assert_eq!(second.added, paths(&["/ac/3"]));
        assert_eq!(second.removed, paths(&["/ac/1"]));
        assert_eq!(set.paths(), paths(&["/ac/2", "/ac/3"]));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut set = ActiveConnectionSet::new();
        let list = paths(&["/ac/5", "/ac/4"]);
        assert!(!set.reconcile(&list).is_empty());
        assert!(set.reconcile(&list).is_empty());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn tracked_paths_follow_every_update() {
        let mut set = ActiveConnectionSet::new();
        let updates = [
            vec!["/ac/1"],
            vec!["/ac/1", "/ac/2", "/ac/3"],
            vec![],
            vec!["/ac/3", "/ac/1"],
            vec!["/ac/3"],
        ];
        for update in updates {
            let list = paths(&update);
            set.reconcile(&list);
            let mut expected = list.clone();
            expected.sort();
            assert_eq!(set.paths(), expected);
        }
    }

    #[test]
    fn removed_placeholder_is_added_again_on_next_pass() {
        let mut set = ActiveConnectionSet::new();
        let list = paths(&["/ac/1", "/ac/2"]);
        set.reconcile(&list);

        assert!(set.remove("/ac/2").is_some());
        assert_eq!(set.paths(), paths(&["/ac/1"]));
        let retry = set.reconcile(&list);
        assert_eq!(retry.added, paths(&["/ac/2"]));
        assert!(retry.removed.is_empty());
    }

    #[test]
    fn root_path_is_not_tracked() {
        let mut set = ActiveConnectionSet::new();
        set.reconcile(&paths(&["/"]));
        assert!(set.is_empty());
    }

    #[test]
    fn type_change_creates_and_drops_vpn_state() {
        let mut conn = ActiveConnection::placeholder("/ac/1");
        assert_eq!(
            conn.apply("Type", &PropertyValue::from("vpn")),
            PropertyEffect::BecameVpn
        );
        assert!(conn.vpn.is_some());
        assert!(conn.set_vpn_state(
            VpnConnectionState::Failed,
            VpnConnectionStateReason::LoginFailed
        ));
        assert!(conn.vpn.unwrap().failed());

        assert_eq!(
            conn.apply("Type", &PropertyValue::from("802-3-ethernet")),
            PropertyEffect::LeftVpn
        );
        assert!(conn.vpn.is_none());
        assert!(!conn.set_vpn_state(
            VpnConnectionState::Activated,
            VpnConnectionStateReason::None
        ));
    }

    #[test]
    fn apply_all_reads_snapshot() {
        let mut props = HashMap::new();
        props.insert("Id".to_string(), PropertyValue::from("Office VPN"));
        props.insert("Uuid".to_string(), PropertyValue::from("1234"));
        props.insert("Type".to_string(), PropertyValue::from("vpn"));
        props.insert("State".to_string(), PropertyValue::UInt32(1));
        props.insert(
            "Connection".to_string(),
            PropertyValue::ObjectPath("/settings/7".into()),
        );

        let mut conn = ActiveConnection::placeholder("/ac/9");
        assert_eq!(conn.apply_all(&props), PropertyEffect::BecameVpn);
        assert_eq!(conn.id, "Office VPN");
        assert_eq!(conn.state, ActiveConnectionState::Activating);
        assert_eq!(conn.connection, "/settings/7");
        assert_eq!(conn.apply_all(&props), PropertyEffect::Unchanged);
    }

    #[test]
    fn lookup_by_saved_connection() {
        let mut set = ActiveConnectionSet::new();
        set.reconcile(&paths(&["/ac/1"]));
        set.get_mut("/ac/1").unwrap().connection = "/settings/3".into();
        assert_eq!(set.by_connection("/settings/3").unwrap().path, "/ac/1");
        assert!(set.by_connection("/settings/4").is_none());
    }
}
