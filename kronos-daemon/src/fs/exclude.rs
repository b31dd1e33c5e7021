//! Exclusion patterns for archive builds.
//!
//! Patterns use standard glob syntax and are tested against an entry's base
//! name only, never against its full path.

use crate::utils::errors::{KeeperError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled set of exclusion globs.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExcludeSet {
    /// Compile the given patterns. An invalid pattern fails the whole set.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|e| KeeperError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| KeeperError::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            set,
        })
    }

    /// A set that excludes nothing.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// First pattern (in declaration order) matching `name`, if any.
    pub fn matching_pattern(&self, name: &str) -> Option<&str> {
        self.set
            .matches(name)
            .into_iter()
            .min()
            .map(|idx| self.patterns[idx].as_str())
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    #[cfg(test)]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_names_are_filtered() {
        let set = ExcludeSet::new(&["*.log", "file", "todo.md"]).unwrap();
        let files = ["backup.log", "my.sql", "node.js", "todo.md", "work.md", "README.md", "file"];

        let kept: Vec<&str> = files.iter().copied().filter(|f| !set.is_excluded(f)).collect();
        assert_eq!(kept, vec!["my.sql", "node.js", "work.md", "README.md"]);
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        let set = ExcludeSet::new(&["*.tmp", "cache*", "cache.tmp"]).unwrap();
        assert_eq!(set.matching_pattern("cache.tmp"), Some("*.tmp"));
        assert_eq!(set.matching_pattern("cache.db"), Some("cache*"));
        assert_eq!(set.matching_pattern("data.db"), None);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let set = ExcludeSet::new(&["*.tmp"]).unwrap();
        assert!(set.is_excluded("b.tmp"));
        assert!(!set.is_excluded("B.TMP"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = ExcludeSet::new(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, KeeperError::InvalidPattern { .. }));
    }

    #[test]
    fn test_empty_set_excludes_nothing() {
        let set = ExcludeSet::empty();
        assert!(!set.is_excluded("anything"));
        assert!(set.patterns().is_empty());
    }
}
