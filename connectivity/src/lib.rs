//! A consistent in-memory model of a Linux device's connectivity.
//!
//! The crate follows NetworkManager, oFono and URfkill over D-Bus and keeps
//! a live picture of:
//!
//! - network links (Wi-Fi, wired, cellular) and the Wi-Fi networks around them
//! - active connections and saved OpenVPN/PPTP connections
//! - modems, SIM cards and the mobile-data and roaming policy
//! - the WLAN kill switch and flight mode
//!
//! It also provides a NetworkManager secret agent that asks the user for
//! Wi-Fi passwords through a pluggable prompt.
//!
//! # Example
//!
//! ```no_run
//! use connectivity::{ConnectivityManager, MemorySettingsStore};
//!
//! # async fn example() -> connectivity::Result<()> {
//! let manager = ConnectivityManager::system(Box::new(MemorySettingsStore::new())).await?;
//! println!("networking is {}", manager.networking_status());
//!
//! let mut links = manager.links().subscribe();
//! while let Some(event) = links.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Change notifications
//!
//! Every component keeps its state current from bus signals; nothing polls.
//! Each component hands out `subscribe()` receivers that get one message per
//! change, after the component's state already reflects it.
//!
//! # Logging
//!
//! This crate uses the [`log`](https://docs.rs/log) facade for logging. To see
//! log output, add a logging implementation like `env_logger`.

// Internal implementation modules
mod core;
mod dbus;
mod util;

// Public API modules
pub mod agent;
pub mod api;
pub mod monitoring;
pub mod types;

// Re-exported public API
pub use api::manager::ConnectivityManager;
pub use api::models::{
    ActiveConnectionState, Characteristics, ConnectivityError, KillSwitchState, LinkStatus, LinkType,
    NetworkingStatus, PinType, VpnConnectionState, VpnConnectionStateReason, VpnType,
};
pub use crate::core::access_point::{AccessPoint, AccessPointKey, GroupedAccessPoint};
pub use crate::core::active_connections::{ActiveConnection, ActiveConnectionEvent, ActiveVpnConnection};
pub use crate::core::counter::Counter;
pub use crate::core::grouper::{AccessPointGrouper, GroupChange};
pub use crate::core::link::{CellularLink, Link, LinkInfo, WiredLink, WifiLink};
pub use crate::core::property_watcher::{
    ObjectIdentity, PropertyCache, PropertyProtocol, PropertyWatcher, WatcherEvent,
};
pub use crate::core::settings::{
    ConnectivitySettings, FileSettingsStore, MemorySettingsStore, SettingValue, SettingsStore,
};
pub use crate::core::sim::{
    LiveSimData, Modem, Outcome, PolicyAction, Sim, SimEvent, SimManagerState, SimRecord,
};
pub use crate::core::vpn::{
    OpenVpnSettings, PptpSettings, VpnActivation, VpnConnection, VpnEvent, VpnSettings,
};
pub use crate::util::variant::{PropertyValue, SettingsMap};

/// A specialized `Result` type for connectivity operations.
pub type Result<T> = std::result::Result<T, ConnectivityError>;
