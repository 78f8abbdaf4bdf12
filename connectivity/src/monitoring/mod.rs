//! Bus-facing tasks that keep the connectivity model current.
//!
//! Every type here owns one or more background tasks fed by D-Bus signals
//! and [`PropertyWatcher`](crate::PropertyWatcher)s. The tasks stop when
//! the last clone of their owner is dropped.

pub mod active_connections;
pub mod kill_switch;
pub mod links;
pub mod sims;
pub mod vpn;
