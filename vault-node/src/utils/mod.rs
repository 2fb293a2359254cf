//! Utility modules for the vault node.

pub mod errors;
pub mod logger;

pub use errors::{NodeError, Result};
