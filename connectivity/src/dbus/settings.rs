//! NetworkManager Settings proxies.

use std::collections::HashMap;
use zbus::{Result, proxy};
use zvariant::{OwnedObjectPath, OwnedValue};

/// Proxy for the saved-connections store.
#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager/Settings"
)]
pub trait NMSettings {
    /// Paths of every saved connection.
    fn list_connections(&self) -> Result<Vec<OwnedObjectPath>>;

    /// Saves a new connection and returns its path.
    fn add_connection(
        &self,
        connection: HashMap<String, HashMap<String, OwnedValue>>,
    ) -> Result<OwnedObjectPath>;

    /// Signal emitted when a connection is saved.
    #[zbus(signal)]
    fn new_connection(&self, connection: OwnedObjectPath);

    /// Signal emitted when a saved connection is deleted.
    #[zbus(signal)]
    fn connection_removed(&self, connection: OwnedObjectPath);
}

/// Proxy for one saved connection.
#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait NMSettingsConnection {
    /// The connection's settings, without secrets.
    fn get_settings(&self) -> Result<HashMap<String, HashMap<String, OwnedValue>>>;

    /// Replaces the connection's settings.
    fn update(&self, properties: HashMap<String, HashMap<String, OwnedValue>>) -> Result<()>;

    /// Deletes the connection.
    fn delete(&self) -> Result<()>;

    /// Signal emitted when the settings change.
    #[zbus(signal)]
    fn updated(&self);
}
