//! Core types, constants, and errors shared by every layer.

mod constants;
mod error;

pub use constants::*;
pub use error::*;

/// Datacenter identifier.
pub type DcId = i32;
