//! KronosKeeper library
//!
//! Scheduled directory backups: cron-driven firings build a dated archive
//! and replicate it to remote storage backends.

pub mod archive;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod notify;
pub mod remote;
pub mod scheduler;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{KeeperError, Result};
