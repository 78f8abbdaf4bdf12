//! Type definitions and constants.
//!
//! Numeric codes, bus names and object paths used by the D-Bus services
//! this crate talks to.

pub mod constants;
