//! NetworkManager Wireless Device proxy.

use zbus::{Result, proxy};
use zvariant::OwnedObjectPath;

/// Proxy for wireless device interface.
///
/// Used for access point enumeration. `ActiveAccessPoint` is followed
/// through a property watcher on the same object.
#[proxy(
    interface = "org.freedesktop.NetworkManager.Device.Wireless",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait NMWireless {
    /// All access points, including those with hidden SSIDs.
    fn get_all_access_points(&self) -> Result<Vec<OwnedObjectPath>>;

    /// Signal emitted when a new access point is discovered.
    #[zbus(signal)]
    fn access_point_added(&self, access_point: OwnedObjectPath);

    /// Signal emitted when an access point is no longer visible.
    #[zbus(signal)]
    fn access_point_removed(&self, access_point: OwnedObjectPath);
}
