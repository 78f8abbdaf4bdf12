//! oFono manager and SIM manager proxies.

use std::collections::HashMap;
use zbus::{Result, proxy};
use zvariant::{OwnedObjectPath, OwnedValue};

/// Proxy for the oFono root object.
///
/// Per-modem interfaces (`Modem`, `SimManager`, `ConnectionManager`) use
/// oFono's own `GetProperties`/`PropertyChanged` convention and are
/// followed through property watchers.
#[proxy(
    interface = "org.ofono.Manager",
    default_service = "org.ofono",
    default_path = "/"
)]
pub trait OfonoManager {
    /// Every modem with its initial `org.ofono.Modem` properties.
    fn get_modems(&self) -> Result<Vec<(OwnedObjectPath, HashMap<String, OwnedValue>)>>;

    /// Signal emitted when a modem appears.
    #[zbus(signal)]
    fn modem_added(&self, path: OwnedObjectPath, properties: HashMap<String, OwnedValue>);

    /// Signal emitted when a modem goes away.
    #[zbus(signal)]
    fn modem_removed(&self, path: OwnedObjectPath);
}

/// Methods of `org.ofono.SimManager`. Lives on the modem's object path.
#[proxy(interface = "org.ofono.SimManager", default_service = "org.ofono")]
pub trait SimManager {
    /// Unlocks the SIM with a PIN or PUK of `pin_type` ("pin", "puk").
    fn enter_pin(&self, pin_type: &str, pin: &str) -> Result<()>;

    /// Unblocks the SIM with `puk` and sets `new_pin`.
    fn reset_pin(&self, pin_type: &str, puk: &str, new_pin: &str) -> Result<()>;
}
