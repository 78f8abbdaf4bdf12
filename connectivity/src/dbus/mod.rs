//! D-Bus proxy interfaces for the services this crate consumes.
//!
//! These are low-level `zbus` proxy definitions. Property reads mostly go
//! through [`PropertyWatcher`](crate::PropertyWatcher) instead; the proxies
//! here cover methods and signals.

mod agent_manager;
mod main_nm;
mod ofono;
mod settings;
mod urfkill;
mod vpn_connection;
mod wireless;

pub(crate) use agent_manager::NMAgentManagerProxy;
pub(crate) use main_nm::{DeviceAddedStream, DeviceRemovedStream, NMProxy};
pub(crate) use ofono::{ModemAddedStream, ModemRemovedStream, OfonoManagerProxy, SimManagerProxy};
pub(crate) use settings::{
    ConnectionRemovedStream, NMSettingsConnectionProxy, NMSettingsProxy, NewConnectionStream,
    UpdatedStream,
};
pub(crate) use urfkill::{URfkillKillswitchProxy, URfkillProxy};
pub(crate) use vpn_connection::{
    NMVpnConnectionProxy, VpnStateChanged as VpnConnectionStateChanged,
    VpnStateChangedStream as VpnConnectionStateChangedStream,
};
pub(crate) use wireless::{AccessPointAddedStream, AccessPointRemovedStream, NMWirelessProxy};
