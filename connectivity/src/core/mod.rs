//! Pure state machines behind the connectivity model.
//!
//! Nothing in here talks to the bus except [`property_watcher`] and
//! [`state_wait`]; everything else is fed values by the `monitoring` tasks
//! and can be tested in isolation.

pub(crate) mod access_point;
pub(crate) mod active_connections;
pub(crate) mod counter;
pub(crate) mod grouper;
pub(crate) mod kill_switch;
pub(crate) mod link;
pub(crate) mod property_watcher;
pub(crate) mod settings;
pub(crate) mod signal;
pub(crate) mod sim;
pub(crate) mod state_wait;
pub(crate) mod vpn;
pub(crate) mod wifi;
