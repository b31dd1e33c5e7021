//! Utility modules for the backup daemon.

pub mod errors;
pub mod logger;

pub use errors::{KeeperError, Result};
