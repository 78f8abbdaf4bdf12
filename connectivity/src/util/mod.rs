//! Utility functions and value conversions.

pub(crate) mod utils;
pub(crate) mod variant;
