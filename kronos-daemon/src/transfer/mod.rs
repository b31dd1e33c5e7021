//! Streaming helpers for remote transfers.

pub mod progress;
pub mod progress_stream;
