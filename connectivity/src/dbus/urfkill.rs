//! URfkill proxies.

use zbus::{Result, proxy};

/// Proxy for the URfkill daemon.
#[proxy(
    interface = "org.freedesktop.URfkill",
    default_service = "org.freedesktop.URfkill",
    default_path = "/org/freedesktop/URfkill"
)]
pub trait URfkill {
    /// Blocks or unblocks every switch of a device type. Returns whether
    /// the request was carried out.
    fn block(&self, device_type: u32, block: bool) -> Result<bool>;

    /// Enters or leaves flight mode. Returns whether the request was
    /// carried out.
    fn flight_mode(&self, block: bool) -> Result<bool>;

    /// Whether flight mode is on.
    fn is_flight_mode(&self) -> Result<bool>;

    /// Signal emitted when flight mode toggles.
    #[zbus(signal)]
    fn flight_mode_changed(&self, flight_mode: bool);
}

/// Proxy for one URfkill kill switch, e.g. `/org/freedesktop/URfkill/WLAN`.
#[proxy(
    interface = "org.freedesktop.URfkill.Killswitch",
    default_service = "org.freedesktop.URfkill"
)]
pub trait URfkillKillswitch {
    /// Switch state: -1 not available, 0 unblocked, 1 soft blocked,
    /// 2 hard blocked.
    #[zbus(property, name = "state")]
    fn state(&self) -> Result<i32>;

    /// Signal emitted when `state` changes. Carries no arguments.
    ///
    /// Named `killswitch_state_changed` so it does not clash with the
    /// change stream zbus generates for the `state` property.
    #[zbus(signal, name = "StateChanged")]
    fn killswitch_state_changed(&self);
}
