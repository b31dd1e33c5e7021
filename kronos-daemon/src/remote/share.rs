//! Network share mounted into the local filesystem.
//!
//! Folder identifiers are paths relative to the mount point, so the share
//! goes through the same resolver as the hierarchical backends.

use super::resolver::{self, split_path, FolderApi};
use super::{upload_name, Backend, BackendKind, RemoteFile, RemoteStorage, FOLDER_MIME_TYPE};
use crate::utils::errors::{KeeperError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const FILE_MIME_TYPE: &str = "application/octet-stream";

pub struct ShareBackend {
    root: PathBuf,
}

impl ShareBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Backend for ShareBackend {
    fn name(&self) -> &str {
        BackendKind::Share.as_str()
    }

    async fn connect(&self) -> Result<Arc<dyn RemoteStorage>> {
        let mounted = tokio::fs::metadata(&self.root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !mounted {
            return Err(KeeperError::NotFound(format!(
                "share {} is not mounted",
                self.root.display()
            )));
        }
        Ok(Arc::new(ShareSession {
            root: self.root.clone(),
        }))
    }
}

pub struct ShareSession {
    root: PathBuf,
}

fn child_id(parent_id: &str, name: &str) -> String {
    if parent_id.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent_id, name)
    }
}

impl ShareSession {
    /// Absolute path of an entry id. Ids that climb out of the share are rejected.
    fn locate(&self, id: &str) -> Result<PathBuf> {
        let relative = Path::new(id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(KeeperError::NotFound(format!("'{}' is outside the share", id)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FolderApi for ShareSession {
    fn root_id(&self) -> &str {
        ""
    }

    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let id = child_id(parent_id, name);
        let is_dir = tokio::fs::metadata(self.locate(&id)?)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        Ok(is_dir.then_some(id))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let id = child_id(parent_id, name);
        let path = self.locate(&id)?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| KeeperError::filesystem(&path, e))?;
        Ok(id)
    }
}

#[async_trait]
impl RemoteStorage for ShareSession {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<String> {
        let name = upload_name(local_path)?;
        let folder_id = resolver::resolve_or_create(self, remote_path).await?;
        let id = child_id(&folder_id, &name);
        let target = self.locate(&id)?;

        let copied = tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| KeeperError::Transfer(format!("copy to {}: {}", target.display(), e)))?;
        debug!("Copied {} bytes to {}", copied, target.display());
        Ok(id)
    }

    async fn list(&self, remote_path: &str) -> Result<Vec<RemoteFile>> {
        let folder_id = resolver::resolve_existing(self, remote_path).await?;
        let folder = self.locate(&folder_id)?;
        let parents: Vec<String> = split_path(remote_path).into_iter().map(String::from).collect();

        let mut dir = tokio::fs::read_dir(&folder)
            .await
            .map_err(|e| KeeperError::filesystem(&folder, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| KeeperError::filesystem(&folder, e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| KeeperError::filesystem(entry.path(), e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(RemoteFile {
                id: child_id(&folder_id, &name),
                name,
                size: if meta.is_dir() { 0 } else { meta.len() },
                parents: parents.clone(),
                mime_type: if meta.is_dir() {
                    FOLDER_MIME_TYPE.to_string()
                } else {
                    FILE_MIME_TYPE.to_string()
                },
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download(&self, file_id: &str, local_path: &Path) -> Result<()> {
        let source = self.locate(file_id)?;
        let is_file = tokio::fs::metadata(&source)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(KeeperError::NotFound(format!("no file '{}' on the share", file_id)));
        }

        tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| KeeperError::filesystem(local_path, e))?;
        Ok(())
    }
}
