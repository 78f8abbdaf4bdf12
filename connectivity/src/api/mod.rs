//! Public API module.
//!
//! [`manager::ConnectivityManager`] ties the monitoring components together;
//! [`models`] holds the value types and the error enum they share.

pub mod manager;
pub mod models;
