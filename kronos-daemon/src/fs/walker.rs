//! Directory traversal for archive builds.
//!
//! Walks an input tree depth-first, prunes excluded entries (an excluded
//! directory takes its whole subtree with it) and reports each remaining
//! entry with the name it gets inside the archive.

use crate::fs::exclude::ExcludeSet;
use crate::utils::errors::{KeeperError, Result};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Base-name exclusion globs
    pub exclude: ExcludeSet,

    /// Directories never descended into (e.g. the archive output itself)
    pub skip_dirs: Vec<PathBuf>,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path on disk
    pub path: PathBuf,

    /// Slash-separated name inside the archive, rooted at the archive root
    pub archive_name: String,

    /// File size in bytes (0 for directories)
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,

    /// Depth from the walked root
    pub depth: usize,

    /// Last modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks to files are archived as their target; symlinks to
    /// directories and broken symlinks yield None.
    fn from_entry(entry: &DirEntry, root: &Path, archive_root: &str) -> Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let raw_metadata = entry
            .metadata()
            .map_err(|e| KeeperError::filesystem(&path, e.into()))?;

        let (size, is_dir, modified) = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => {
                    debug!("Skipping symlink to directory {}", path.display());
                    return Ok(None);
                }
                Ok(resolved) => (resolved.len(), false, resolved.modified().ok()),
                Err(_) => {
                    debug!("Skipping broken symlink {}", path.display());
                    return Ok(None);
                }
            }
        } else if raw_metadata.is_dir() {
            (0, true, raw_metadata.modified().ok())
        } else {
            (raw_metadata.len(), false, raw_metadata.modified().ok())
        };

        let relative = path.strip_prefix(root).unwrap_or(&path);

        Ok(Some(Self {
            archive_name: archive_name(archive_root, relative),
            path,
            size,
            is_dir,
            depth: entry.depth(),
            modified,
        }))
    }
}

/// Join the archive root and a relative path with forward slashes.
fn archive_name(archive_root: &str, relative: &Path) -> String {
    let mut name = archive_root.to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            name.push('/');
            name.push_str(&part.to_string_lossy());
        }
    }
    name
}

/// Walk a directory tree with a callback for each included entry.
///
/// The root itself is always reported (as `archive_root`) and is never
/// matched against the exclusion set. The first I/O error aborts the walk.
pub fn walk_directory_with_callback<F>(
    root: &Path,
    archive_root: &str,
    options: &WalkOptions,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(&FileInfo) -> Result<()>,
{
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !should_skip(entry, options));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            KeeperError::filesystem(path, source)
        })?;

        if let Some(file_info) = FileInfo::from_entry(&entry, root, archive_root)? {
            callback(&file_info)?;
        }
    }

    Ok(())
}

/// Walk a directory tree and collect every included entry
#[cfg(test)]
pub fn walk_directory(
    root: &Path,
    archive_root: &str,
    options: &WalkOptions,
) -> Result<Vec<FileInfo>> {
    let mut entries = Vec::new();
    walk_directory_with_callback(root, archive_root, options, |info| {
        entries.push(info.clone());
        Ok(())
    })?;
    Ok(entries)
}

/// Check if a directory entry should be pruned from the walk
fn should_skip(entry: &DirEntry, options: &WalkOptions) -> bool {
    if entry.depth() == 0 {
        return false;
    }

    if entry.file_type().is_dir() && options.skip_dirs.iter().any(|dir| dir == entry.path()) {
        debug!("Skipping output directory {}", entry.path().display());
        return true;
    }

    let file_name = entry.file_name().to_string_lossy();
    match options.exclude.matching_pattern(&file_name) {
        Some(pattern) => {
            debug!("Excluding {} (pattern '{}')", entry.path().display(), pattern);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(entries: &[FileInfo]) -> Vec<&str> {
        entries.iter().map(|e| e.archive_name.as_str()).collect()
    }

    #[test]
    fn test_walk_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = walk_directory(temp_dir.path(), "root", &WalkOptions::default())?;
        assert_eq!(names(&entries), vec!["root"]);
        assert!(entries[0].is_dir);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let entries = walk_directory(temp_dir.path(), "db", &WalkOptions::default())?;
        assert_eq!(
            names(&entries),
            vec!["db", "db/file1.txt", "db/subdir", "db/subdir/file2.txt"]
        );
        assert_eq!(entries[1].size, 8);

        Ok(())
    }

    #[test]
    fn test_excluded_directory_prunes_subtree() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("cache/deep"))?;
        fs::write(temp_dir.path().join("cache/deep/keep.sql"), b"x")?;
        fs::write(temp_dir.path().join("a.sql"), b"x")?;
        fs::write(temp_dir.path().join("b.tmp"), b"x")?;

        let options = WalkOptions {
            exclude: ExcludeSet::new(&["*.tmp", "cache"])?,
            ..Default::default()
        };
        let entries = walk_directory(temp_dir.path(), "db", &options)?;
        assert_eq!(names(&entries), vec!["db", "db/a.sql"]);

        Ok(())
    }

    #[test]
    fn test_root_is_never_excluded() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("logs");
        fs::create_dir(&root)?;
        fs::write(root.join("app.txt"), b"x")?;

        let options = WalkOptions {
            exclude: ExcludeSet::new(&["logs"])?,
            ..Default::default()
        };
        let entries = walk_directory(&root, "logs", &options)?;
        assert_eq!(names(&entries), vec!["logs", "logs/app.txt"]);

        Ok(())
    }

    #[test]
    fn test_skip_dirs_are_not_walked() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let output = temp_dir.path().join("backups");
        fs::create_dir(&output)?;
        fs::write(output.join("old.zip"), b"x")?;
        fs::write(temp_dir.path().join("data.bin"), b"x")?;

        let options = WalkOptions {
            skip_dirs: vec![output],
            ..Default::default()
        };
        let entries = walk_directory(temp_dir.path(), "src", &options)?;
        assert_eq!(names(&entries), vec!["src", "src/data.bin"]);

        Ok(())
    }

    #[test]
    fn test_missing_root_is_filesystem_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        let err = walk_directory(&missing, "nope", &WalkOptions::default()).unwrap_err();
        assert!(matches!(err, KeeperError::Filesystem { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_to_directories_are_skipped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("target");
        let root = temp_dir.path().join("root");
        fs::create_dir(&target)?;
        fs::create_dir(&root)?;
        fs::write(target.join("inner.txt"), b"x")?;
        fs::write(root.join("file.txt"), b"12345")?;
        std::os::unix::fs::symlink(&target, root.join("dirlink"))?;
        std::os::unix::fs::symlink(root.join("file.txt"), root.join("filelink"))?;

        let entries = walk_directory(&root, "root", &WalkOptions::default())?;
        assert_eq!(names(&entries), vec!["root", "root/file.txt", "root/filelink"]);
        assert_eq!(entries[2].size, 5);

        Ok(())
    }
}
