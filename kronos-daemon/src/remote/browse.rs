//! Recursive browsing of a remote tree.

use super::{RemoteFile, RemoteStorage};
use crate::utils::errors::Result;
use futures_util::future::BoxFuture;
use std::collections::HashSet;

/// One listed entry and its depth below the browsed root.
#[derive(Debug, Clone)]
pub struct BrowseEntry {
    pub depth: usize,
    pub file: RemoteFile,
}

/// List `root` and every folder below it, depth first. A folder whose id
/// has already been visited is reported but not entered again.
pub async fn browse(storage: &dyn RemoteStorage, root: &str) -> Result<Vec<BrowseEntry>> {
    let mut visited = HashSet::new();
    let mut entries = Vec::new();
    walk(storage, root.to_string(), 0, &mut visited, &mut entries).await?;
    Ok(entries)
}

fn walk<'a>(
    storage: &'a dyn RemoteStorage,
    path: String,
    depth: usize,
    visited: &'a mut HashSet<String>,
    entries: &'a mut Vec<BrowseEntry>,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for file in storage.list(&path).await? {
            let descend = file.is_dir() && visited.insert(file.id.clone());
            let child = join(&path, &file.name);
            entries.push(BrowseEntry { depth, file });
            if descend {
                walk(storage, child, depth + 1, visited, entries).await?;
            }
        }
        Ok(())
    })
}

fn join(path: &str, name: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path, name)
    }
}

/// Indented tree, one entry per line.
pub fn render(entries: &[BrowseEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let indent = "  ".repeat(entry.depth);
            if entry.file.is_dir() {
                format!("{}{}/", indent, entry.file.name)
            } else {
                format!(
                    "{}{} ({}) [{}]",
                    indent,
                    entry.file.name,
                    entry.file.size_suffix(),
                    entry.file.id
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
