//! Logical path to folder-id resolution for hierarchical backends.
//!
//! Hierarchical stores identify folders by opaque ids. These functions walk
//! a slash-separated path segment by segment from the backend root, either
//! creating missing folders or failing with `NotFound`. They hold no state of
//! their own; the session is passed in.
//!
//! The check-then-create step is not atomic against the remote service: two
//! sessions creating the same missing path at once can produce duplicate
//! folders.

use crate::utils::errors::{KeeperError, Result};
use async_trait::async_trait;
use tracing::debug;

/// Folder primitives a hierarchical backend session provides.
#[async_trait]
pub trait FolderApi: Send + Sync {
    /// Identifier of the backend root folder.
    fn root_id(&self) -> &str;

    /// Identifier of the folder `name` directly under `parent_id`, if any.
    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>>;

    /// Create folder `name` under `parent_id` and return its identifier.
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String>;
}

/// Non-empty segments of a slash-separated path.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

/// Resolve `path` to the id of its deepest folder, creating every missing
/// segment on the way.
pub async fn resolve_or_create<A>(api: &A, path: &str) -> Result<String>
where
    A: FolderApi + ?Sized,
{
    let mut parent_id = api.root_id().to_string();

    for segment in split_path(path) {
        parent_id = match api.find_folder(segment, &parent_id).await? {
            Some(id) => id,
            None => {
                let id = api
                    .create_folder(segment, &parent_id)
                    .await
                    .map_err(|e| match e {
                        KeeperError::Auth(_) => e,
                        other => KeeperError::NotFound(format!(
                            "cannot create folder '{}' in '{}': {}",
                            segment, path, other
                        )),
                    })?;
                debug!("Created remote folder '{}' ({})", segment, id);
                id
            }
        };
    }

    Ok(parent_id)
}

/// Resolve `path` without creating anything. Fails with `NotFound` at the
/// first missing segment.
pub async fn resolve_existing<A>(api: &A, path: &str) -> Result<String>
where
    A: FolderApi + ?Sized,
{
    let mut parent_id = api.root_id().to_string();

    for segment in split_path(path) {
        parent_id = api.find_folder(segment, &parent_id).await?.ok_or_else(|| {
            KeeperError::NotFound(format!("folder '{}' of '{}' does not exist", segment, path))
        })?;
    }

    Ok(parent_id)
}
