//! Filesystem traversal and exclusion rules for archive builds.

pub mod exclude;
pub mod walker;
