//! NetworkManager VPN connection proxy.

use zbus::{Result, proxy};

/// Proxy for the VPN-specific interface of an active connection.
///
/// Exposed on the same object path as the active connection whenever its
/// type is `vpn`.
///
/// # Signals
///
/// `VpnStateChanged` carries the new state and the reason for it. Use
/// `receive_vpn_connection_state_changed()` to follow it:
///
/// ```ignore
/// let mut stream = vpn.receive_vpn_connection_state_changed().await?;
/// while let Some(signal) = stream.next().await {
///     let args = signal.args()?;
///     println!("VPN state {} (reason {})", args.state, args.reason);
/// }
/// ```
#[proxy(
    interface = "org.freedesktop.NetworkManager.VPN.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait NMVpnConnection {
    /// Current VPN state.
    ///
    /// Values:
    /// - 0: Unknown
    /// - 1: Prepare
    /// - 2: NeedAuth
    /// - 3: Connect
    /// - 4: IpConfigGet
    /// - 5: Activated
    /// - 6: Failed
    /// - 7: Disconnected
    #[zbus(property)]
    fn vpn_state(&self) -> Result<u32>;

    /// Banner text sent by the VPN server, if any.
    #[zbus(property)]
    fn banner(&self) -> Result<String>;

    /// Signal emitted when the VPN state changes.
    ///
    /// Named `vpn_connection_state_changed` to avoid clashing with the
    /// `vpn_state` property's change stream.
    #[zbus(signal, name = "VpnStateChanged")]
    fn vpn_connection_state_changed(&self, state: u32, reason: u32);
}
