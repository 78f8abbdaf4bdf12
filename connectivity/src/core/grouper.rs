//! Deduplication of raw scan results into logical networks.
//!
//! One [`GroupedAccessPoint`] exists per distinct [`AccessPointKey`] seen on
//! a link. Groups are created by the first member with a new key and
//! destroyed when their last member leaves.

use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

use crate::Result;
use crate::core::access_point::{AccessPoint, AccessPointKey, GroupedAccessPoint};

/// What an operation did to the set of groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChange {
    Created(AccessPointKey),
    Updated(AccessPointKey),
    Removed(AccessPointKey),
    Unchanged,
}

/// Owns every [`GroupedAccessPoint`] of one Wi-Fi link.
#[derive(Debug, Default)]
pub struct AccessPointGrouper {
    groups: BTreeMap<AccessPointKey, GroupedAccessPoint>,
    index: HashMap<String, AccessPointKey>,
}

impl AccessPointGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a raw access point to the group matching its key.
    pub fn add(&mut self, ap: AccessPoint) -> Result<GroupChange> {
        let key = ap.key();

        // A known path whose key changed moves to its new group.
        if let Some(previous) = self.index.get(&ap.path).cloned()
            && previous != key
        {
            debug!("Access point {} changed group", ap.path);
            self.remove(&ap.path);
        }

        let path = ap.path.clone();
        let change = match self.groups.get_mut(&key) {
            Some(group) => {
                let before = (group.strength(), group.last_connected(), group.len());
                group.add(ap)?;
                if before == (group.strength(), group.last_connected(), group.len()) {
                    GroupChange::Unchanged
                } else {
                    GroupChange::Updated(key.clone())
                }
            }
            None => {
                debug!("New network {:?}", ap.ssid);
                self.groups
                    .insert(key.clone(), GroupedAccessPoint::new(ap));
                GroupChange::Created(key.clone())
            }
        };
        self.index.insert(path, key);
        Ok(change)
    }

    /// Removes a raw access point. The group goes away with its last member.
    pub fn remove(&mut self, path: &str) -> GroupChange {
        let Some(key) = self.index.remove(path) else {
            warn!("Tried to remove access point {path} that was never added");
            return GroupChange::Unchanged;
        };
        let Some(group) = self.groups.get_mut(&key) else {
            return GroupChange::Unchanged;
        };

        group.remove(path);
        if group.is_empty() {
            self.groups.remove(&key);
            GroupChange::Removed(key)
        } else {
            GroupChange::Updated(key)
        }
    }

    /// Routes a strength update to the owning group.
    pub fn update_strength(&mut self, path: &str, strength: u8) -> GroupChange {
        let Some(key) = self.index.get(path) else {
            return GroupChange::Unchanged;
        };
        if let Some(group) = self.groups.get_mut(key)
            && group.update_strength(path, strength)
        {
            GroupChange::Updated(key.clone())
        } else {
            GroupChange::Unchanged
        }
    }

    /// Routes a last-connected update to the owning group.
    pub fn update_last_connected(&mut self, path: &str, timestamp: u64) -> GroupChange {
        let Some(key) = self.index.get(path) else {
            return GroupChange::Unchanged;
        };
        if let Some(group) = self.groups.get_mut(key)
            && group.update_last_connected(path, timestamp)
        {
            GroupChange::Updated(key.clone())
        } else {
            GroupChange::Unchanged
        }
    }

    /// Membership test by object identity.
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// The group a raw access point belongs to.
    pub fn group_of(&self, path: &str) -> Option<&GroupedAccessPoint> {
        self.index.get(path).and_then(|key| self.groups.get(key))
    }

    pub fn get(&self, key: &AccessPointKey) -> Option<&GroupedAccessPoint> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&AccessPointKey, &GroupedAccessPoint)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.index.clear();
    }
}
