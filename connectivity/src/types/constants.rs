//! Constants for the D-Bus services consumed and exported by this crate.
//!
//! These correspond to the numeric codes, bus names and object paths used by
//! NetworkManager, oFono and URfkill.

/// NetworkManager bus name, root object and well-known paths.
pub mod network_manager {
    pub const SERVICE: &str = "org.freedesktop.NetworkManager";
    pub const PATH: &str = "/org/freedesktop/NetworkManager";
    pub const INTERFACE: &str = "org.freedesktop.NetworkManager";
    pub const SETTINGS_PATH: &str = "/org/freedesktop/NetworkManager/Settings";
    pub const AGENT_MANAGER_PATH: &str = "/org/freedesktop/NetworkManager/AgentManager";
    pub const ACTIVE_CONNECTION_INTERFACE: &str =
        "org.freedesktop.NetworkManager.Connection.Active";
    pub const VPN_CONNECTION_INTERFACE: &str = "org.freedesktop.NetworkManager.VPN.Connection";
    pub const DEVICE_INTERFACE: &str = "org.freedesktop.NetworkManager.Device";
    pub const WIRELESS_INTERFACE: &str = "org.freedesktop.NetworkManager.Device.Wireless";
    pub const ACCESS_POINT_INTERFACE: &str = "org.freedesktop.NetworkManager.AccessPoint";
}

/// The secret agent object this crate exports.
pub mod secret_agent {
    pub const PATH: &str = "/org/freedesktop/NetworkManager/SecretAgent";
    pub const INTERFACE: &str = "org.freedesktop.NetworkManager.SecretAgent";
    pub const DEFAULT_IDENTIFIER: &str = "org.connectivity.SecretAgent";
    pub const NO_PASSWORD_MESSAGE: &str = "No password found for this connection.";
}

/// NetworkManager device type constants.
pub mod device_type {
    pub const ETHERNET: u32 = 1;
    pub const WIFI: u32 = 2;
    pub const MODEM: u32 = 8;
}

/// NetworkManager device state constants.
pub mod device_state {
    pub const UNKNOWN: u32 = 0;
    pub const UNMANAGED: u32 = 10;
    pub const UNAVAILABLE: u32 = 20;
    pub const DISCONNECTED: u32 = 30;
    pub const PREPARE: u32 = 40;
    pub const CONFIG: u32 = 50;
    pub const NEED_AUTH: u32 = 60;
    pub const IP_CONFIG: u32 = 70;
    pub const IP_CHECK: u32 = 80;
    pub const SECONDARIES: u32 = 90;
    pub const ACTIVATED: u32 = 100;
    pub const DEACTIVATING: u32 = 110;
    pub const FAILED: u32 = 120;
}

/// NetworkManager global state (`State` property of the root object).
pub mod nm_state {
    pub const UNKNOWN: u32 = 0;
    pub const ASLEEP: u32 = 10;
    pub const DISCONNECTED: u32 = 20;
    pub const DISCONNECTING: u32 = 30;
    pub const CONNECTING: u32 = 40;
    pub const CONNECTED_LOCAL: u32 = 50;
    pub const CONNECTED_SITE: u32 = 60;
    pub const CONNECTED_GLOBAL: u32 = 70;
}

/// WiFi mode constants
pub mod wifi_mode {
    pub const ADHOC: u32 = 1;
    pub const INFRA: u32 = 2;
}

/// Connection setting names and values.
pub mod setting {
    pub const CONNECTION: &str = "connection";
    pub const WIRELESS: &str = "802-11-wireless";
    pub const WIRELESS_SECURITY: &str = "802-11-wireless-security";
    pub const VPN: &str = "vpn";
    pub const IPV4: &str = "ipv4";
    pub const KEY_MGMT: &str = "key-mgmt";
    pub const PSK: &str = "psk";
    pub const WEP_KEY0: &str = "wep-key0";
    pub const VPN_TYPE: &str = "vpn";
    pub const OPENVPN_SERVICE: &str = "org.freedesktop.NetworkManager.openvpn";
    pub const PPTP_SERVICE: &str = "org.freedesktop.NetworkManager.pptp";
}

/// oFono bus name and interfaces.
pub mod ofono {
    pub const SERVICE: &str = "org.ofono";
    pub const MANAGER_PATH: &str = "/";
    pub const MODEM_INTERFACE: &str = "org.ofono.Modem";
    pub const SIM_MANAGER_INTERFACE: &str = "org.ofono.SimManager";
    pub const CONNECTION_MANAGER_INTERFACE: &str = "org.ofono.ConnectionManager";
}

/// URfkill bus name, objects and codes.
pub mod urfkill {
    pub const SERVICE: &str = "org.freedesktop.URfkill";
    pub const PATH: &str = "/org/freedesktop/URfkill";
    pub const WLAN_KILLSWITCH_PATH: &str = "/org/freedesktop/URfkill/WLAN";
    pub const KILLSWITCH_INTERFACE: &str = "org.freedesktop.URfkill.Killswitch";

    /// `Block` device type for wireless LAN.
    pub const DEVICE_TYPE_WLAN: u32 = 1;
}

/// Timeout constants for bounded waits.
///
/// Only startup and registration calls wait synchronously; everything else
/// is signal driven.
pub mod timeouts {
    use std::time::Duration;

    /// Maximum time to wait for the agent manager to answer `Register`.
    pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default time to wait for a VPN to finish activating.
    pub const VPN_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(60);
}
