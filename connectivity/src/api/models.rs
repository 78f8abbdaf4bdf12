use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// NetworkManager active connection state.
///
/// These values represent the lifecycle states of an active connection
/// as reported by the NM D-Bus API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveConnectionState {
    /// Connection state is unknown.
    Unknown,
    /// Connection is activating (connecting).
    Activating,
    /// Connection is fully activated (connected).
    Activated,
    /// Connection is deactivating (disconnecting).
    Deactivating,
    /// Connection is fully deactivated (disconnected).
    Deactivated,
    /// Unknown state code not mapped to a specific variant.
    Other(u32),
}

impl From<u32> for ActiveConnectionState {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Unknown,
            1 => Self::Activating,
            2 => Self::Activated,
            3 => Self::Deactivating,
            4 => Self::Deactivated,
            v => Self::Other(v),
        }
    }
}

impl Display for ActiveConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Activating => write!(f, "activating"),
            Self::Activated => write!(f, "activated"),
            Self::Deactivating => write!(f, "deactivating"),
            Self::Deactivated => write!(f, "deactivated"),
            Self::Other(v) => write!(f, "unknown state ({v})"),
        }
    }
}

/// Fine-grained activation state of a VPN connection.
///
/// Reported by the `org.freedesktop.NetworkManager.VPN.Connection`
/// interface through the `VpnState` property and `VpnStateChanged` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VpnConnectionState {
    Unknown,
    Prepare,
    NeedAuth,
    Connect,
    IpConfigGet,
    Activated,
    Failed,
    Disconnected,
    Other(u32),
}

impl From<u32> for VpnConnectionState {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Unknown,
            1 => Self::Prepare,
            2 => Self::NeedAuth,
            3 => Self::Connect,
            4 => Self::IpConfigGet,
            5 => Self::Activated,
            6 => Self::Failed,
            7 => Self::Disconnected,
            v => Self::Other(v),
        }
    }
}

impl Display for VpnConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Prepare => write!(f, "preparing"),
            Self::NeedAuth => write!(f, "waiting for credentials"),
            Self::Connect => write!(f, "connecting"),
            Self::IpConfigGet => write!(f, "requesting IP configuration"),
            Self::Activated => write!(f, "activated"),
            Self::Failed => write!(f, "failed"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Other(v) => write!(f, "unknown VPN state ({v})"),
        }
    }
}

/// Reason attached to a VPN state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VpnConnectionStateReason {
    Unknown,
    None,
    UserDisconnected,
    DeviceDisconnected,
    ServiceStopped,
    IpConfigInvalid,
    ConnectTimeout,
    ServiceStartTimeout,
    ServiceStartFailed,
    NoSecrets,
    LoginFailed,
    ConnectionRemoved,
    Other(u32),
}

impl From<u32> for VpnConnectionStateReason {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Unknown,
            1 => Self::None,
            2 => Self::UserDisconnected,
            3 => Self::DeviceDisconnected,
            4 => Self::ServiceStopped,
            5 => Self::IpConfigInvalid,
            6 => Self::ConnectTimeout,
            7 => Self::ServiceStartTimeout,
            8 => Self::ServiceStartFailed,
            9 => Self::NoSecrets,
            10 => Self::LoginFailed,
            11 => Self::ConnectionRemoved,
            v => Self::Other(v),
        }
    }
}

impl Display for VpnConnectionStateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::None => write!(f, "none"),
            Self::UserDisconnected => write!(f, "disconnected by user"),
            Self::DeviceDisconnected => write!(f, "underlying device disconnected"),
            Self::ServiceStopped => write!(f, "VPN service stopped"),
            Self::IpConfigInvalid => write!(f, "invalid IP configuration"),
            Self::ConnectTimeout => write!(f, "connection attempt timed out"),
            Self::ServiceStartTimeout => write!(f, "VPN service did not start in time"),
            Self::ServiceStartFailed => write!(f, "VPN service failed to start"),
            Self::NoSecrets => write!(f, "no valid secrets"),
            Self::LoginFailed => write!(f, "login failed"),
            Self::ConnectionRemoved => write!(f, "connection was removed"),
            Self::Other(v) => write!(f, "unknown reason ({v})"),
        }
    }
}

/// High-level status of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// The radio or device is switched off.
    Disabled,
    /// Usable but not connected.
    Offline,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected, but without confirmed upstream connectivity.
    Connected,
    /// Connected with full connectivity.
    Online,
}

impl Display for LinkStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Offline => write!(f, "offline"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Online => write!(f, "online"),
        }
    }
}

/// The kind of a link. Used as the explicit tag of [`crate::Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Wifi,
    Wired,
    Cellular,
}

impl Display for LinkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wifi => write!(f, "wifi"),
            Self::Wired => write!(f, "wired"),
            Self::Cellular => write!(f, "cellular"),
        }
    }
}

bitflags! {
    /// Cost characteristics of a link.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Characteristics: u32 {
        const METERED = 0b001;
        const BANDWIDTH_LIMITED = 0b010;
        const VOLUME_LIMITED = 0b100;
    }
}

/// Overall networking status derived from NetworkManager's global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkingStatus {
    Offline,
    Connecting,
    Online,
}

impl Display for NetworkingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Connecting => write!(f, "connecting"),
            Self::Online => write!(f, "online"),
        }
    }
}

/// State of an rfkill kill switch as reported by URfkill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillSwitchState {
    NotAvailable,
    Unblocked,
    SoftBlocked,
    HardBlocked,
}

impl From<i32> for KillSwitchState {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Unblocked,
            1 => Self::SoftBlocked,
            2 => Self::HardBlocked,
            _ => Self::NotAvailable,
        }
    }
}

impl KillSwitchState {
    /// Whether the radio is blocked by either the software or hardware switch.
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::SoftBlocked | Self::HardBlocked)
    }
}

impl Display for KillSwitchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAvailable => write!(f, "not available"),
            Self::Unblocked => write!(f, "unblocked"),
            Self::SoftBlocked => write!(f, "soft blocked"),
            Self::HardBlocked => write!(f, "hard blocked"),
        }
    }
}

/// PIN a SIM is currently asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    None,
    Pin,
    Puk,
}

impl PinType {
    /// Parses oFono's `PinRequired` value. Anything unrecognised is treated
    /// as no PIN being required.
    pub fn from_ofono(value: &str) -> Self {
        match value {
            "pin" => Self::Pin,
            "puk" => Self::Puk,
            _ => Self::None,
        }
    }

    /// The type name oFono's `SimManager` methods take.
    pub fn as_ofono(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Pin => Some("pin"),
            Self::Puk => Some("puk"),
        }
    }
}

/// Supported VPN protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VpnType {
    OpenVpn,
    Pptp,
}

impl VpnType {
    /// The NetworkManager plugin service type for this protocol.
    pub fn service_type(self) -> &'static str {
        match self {
            Self::OpenVpn => crate::types::constants::setting::OPENVPN_SERVICE,
            Self::Pptp => crate::types::constants::setting::PPTP_SERVICE,
        }
    }

    /// Maps a `vpn.service-type` value back to a protocol.
    pub fn from_service_type(service: &str) -> Option<Self> {
        match service {
            crate::types::constants::setting::OPENVPN_SERVICE => Some(Self::OpenVpn),
            crate::types::constants::setting::PPTP_SERVICE => Some(Self::Pptp),
            _ => None,
        }
    }
}

impl Display for VpnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenVpn => write!(f, "OpenVPN"),
            Self::Pptp => write!(f, "PPTP"),
        }
    }
}

/// Errors that can occur in the connectivity model.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    /// A D-Bus communication error occurred.
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// A value could not be converted to or from its D-Bus representation.
    #[error("variant conversion error: {0}")]
    Variant(#[from] zvariant::Error),

    /// Reading or writing the settings file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file could not be parsed or serialized.
    #[error("settings error: {0}")]
    Settings(String),

    /// The requested object is not tracked.
    #[error("not found: {0}")]
    NotFound(String),

    /// Two access points with different SSIDs were merged into one group.
    #[error("tried to merge access points from different networks ({existing:?} and {incoming:?})")]
    GroupingMismatch { existing: String, incoming: String },

    /// Unblocking was requested on a switch held by hardware.
    #[error("kill switch is hard blocked")]
    KillSwitchHardBlocked,

    /// The requested state is already held.
    #[error("toggle is already {0}")]
    ToggleNoOp(String),

    /// The toggle has no backing service.
    #[error("toggle is not available")]
    ToggleUnavailable,

    /// The remote service refused the request.
    #[error("request refused by {0}")]
    Refused(String),

    /// No VPN connection matched.
    #[error("no VPN connection found")]
    NoVpnConnection,

    /// A connection definition uses a VPN plugin this crate does not model.
    #[error("unsupported VPN service type: {0}")]
    UnsupportedVpnType(String),

    /// Another VPN connection is still changing state.
    #[error("another VPN connection is busy")]
    VpnBusy,

    /// VPN activation ended in a failure state.
    #[error("VPN connection failed: {state} ({reason})")]
    VpnFailed {
        state: VpnConnectionState,
        reason: VpnConnectionStateReason,
    },

    /// A PIN or PUK that can not be sent to the SIM.
    #[error("invalid PIN request: {0}")]
    InvalidPin(String),

    /// A bounded wait ran out.
    #[error("operation timed out")]
    Timeout,

    /// A stream or task ended when it should not have.
    #[error("stuck: {0}")]
    Stuck(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_connection_state_from_u32() {
        assert_eq!(ActiveConnectionState::from(0), ActiveConnectionState::Unknown);
        assert_eq!(ActiveConnectionState::from(1), ActiveConnectionState::Activating);
        assert_eq!(ActiveConnectionState::from(2), ActiveConnectionState::Activated);
        assert_eq!(ActiveConnectionState::from(3), ActiveConnectionState::Deactivating);
        assert_eq!(ActiveConnectionState::from(4), ActiveConnectionState::Deactivated);
        assert_eq!(ActiveConnectionState::from(99), ActiveConnectionState::Other(99));
    }

    #[test]
    fn vpn_state_from_u32() {
        assert_eq!(VpnConnectionState::from(1), VpnConnectionState::Prepare);
        assert_eq!(VpnConnectionState::from(2), VpnConnectionState::NeedAuth);
        assert_eq!(VpnConnectionState::from(5), VpnConnectionState::Activated);
        assert_eq!(VpnConnectionState::from(6), VpnConnectionState::Failed);
        assert_eq!(VpnConnectionState::from(7), VpnConnectionState::Disconnected);
        assert_eq!(VpnConnectionState::from(42), VpnConnectionState::Other(42));
    }

    #[test]
    fn vpn_reason_display() {
        assert_eq!(
            format!("{}", VpnConnectionStateReason::from(10)),
            "login failed"
        );
        assert_eq!(
            format!("{}", VpnConnectionStateReason::from(9)),
            "no valid secrets"
        );
        assert_eq!(
            format!("{}", VpnConnectionStateReason::from(77)),
            "unknown reason (77)"
        );
    }

    #[test]
    fn kill_switch_state_out_of_range_is_not_available() {
        assert_eq!(KillSwitchState::from(-1), KillSwitchState::NotAvailable);
        assert_eq!(KillSwitchState::from(0), KillSwitchState::Unblocked);
        assert_eq!(KillSwitchState::from(1), KillSwitchState::SoftBlocked);
        assert_eq!(KillSwitchState::from(2), KillSwitchState::HardBlocked);
        assert_eq!(KillSwitchState::from(3), KillSwitchState::NotAvailable);
        assert_eq!(KillSwitchState::from(-7), KillSwitchState::NotAvailable);
    }

    #[test]
    fn kill_switch_blocked() {
        assert!(KillSwitchState::SoftBlocked.is_blocked());
        assert!(KillSwitchState::HardBlocked.is_blocked());
        assert!(!KillSwitchState::Unblocked.is_blocked());
        assert!(!KillSwitchState::NotAvailable.is_blocked());
    }

    #[test]
    fn vpn_type_service_round_trip() {
        assert_eq!(
            VpnType::from_service_type("org.freedesktop.NetworkManager.openvpn"),
            Some(VpnType::OpenVpn)
        );
        assert_eq!(
            VpnType::from_service_type(VpnType::Pptp.service_type()),
            Some(VpnType::Pptp)
        );
        assert_eq!(
            VpnType::from_service_type("org.freedesktop.NetworkManager.wireguard"),
            None
        );
    }

    #[test]
    fn pin_type_parse() {
        assert_eq!(PinType::from_ofono("pin"), PinType::Pin);
        assert_eq!(PinType::from_ofono("puk"), PinType::Puk);
        assert_eq!(PinType::from_ofono("none"), PinType::None);
        assert_eq!(PinType::from_ofono("service"), PinType::None);
        assert_eq!(PinType::Puk.as_ofono(), Some("puk"));
        assert_eq!(PinType::None.as_ofono(), None);
    }

    #[test]
    fn characteristics_flags() {
        let c = Characteristics::empty();
        assert!(c.is_empty());
        let metered = Characteristics::METERED | Characteristics::VOLUME_LIMITED;
        assert!(metered.contains(Characteristics::METERED));
        assert!(!metered.contains(Characteristics::BANDWIDTH_LIMITED));
    }

    #[test]
    fn error_display() {
        let e = ConnectivityError::GroupingMismatch {
            existing: "Home".into(),
            incoming: "Work".into(),
        };
        assert_eq!(
            format!("{e}"),
            "tried to merge access points from different networks (\"Home\" and \"Work\")"
        );
        let e = ConnectivityError::VpnFailed {
            state: VpnConnectionState::Failed,
            reason: VpnConnectionStateReason::LoginFailed,
        };
        assert_eq!(format!("{e}"), "VPN connection failed: failed (login failed)");
        assert_eq!(
            format!("{}", ConnectivityError::KillSwitchHardBlocked),
            "kill switch is hard blocked"
        );
    }
}
