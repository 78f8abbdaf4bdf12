//! NetworkManager AgentManager proxy.

use zbus::{Result, proxy};

/// Proxy for secret agent registration.
///
/// Registration is tied to the caller's bus connection and does not
/// survive a NetworkManager restart.
#[proxy(
    interface = "org.freedesktop.NetworkManager.AgentManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager/AgentManager"
)]
pub trait NMAgentManager {
    /// Registers the caller's `/org/freedesktop/NetworkManager/SecretAgent`
    /// object under `identifier`.
    fn register(&self, identifier: &str) -> Result<()>;

    /// Drops the caller's registration.
    fn unregister(&self) -> Result<()>;
}
