//! Remote storage backends.
//!
//! Every backend exposes the same capability set ([`RemoteStorage`]):
//! upload a file under a logical slash-path, list the immediate children of
//! a logical path, download an entry by its backend-native identifier.
//! A [`Backend`] holds the long-lived configuration and hands out a session
//! with fresh credentials on [`Backend::connect`].

pub mod browse;
pub mod cloud;
pub mod drive;
pub mod oauth;
pub mod resolver;
pub mod share;

use crate::config::RemoteStorages;
use crate::transfer::progress::format_bytes;
use crate::utils::errors::{KeeperError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Type discriminator marking an entry as a folder, shared by all backends.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Backend-agnostic view of a remote entry, produced by listing calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Backend-native identifier
    pub id: String,
    pub name: String,
    pub size: u64,
    /// Ancestor folder names
    pub parents: Vec<String>,
    pub mime_type: String,
}

impl RemoteFile {
    pub fn is_dir(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Parent names and the entry name joined with `/`.
    pub fn path(&self) -> String {
        self.parents
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn size_suffix(&self) -> String {
        format_bytes(self.size)
    }
}

/// An open session against one backend.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Upload `local_path` into the folder at `remote_path`, creating missing
    /// folders. Returns the identifier of the new remote entry.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<String>;

    /// List the immediate children of the folder at `remote_path`.
    async fn list(&self, remote_path: &str) -> Result<Vec<RemoteFile>>;

    /// Stream the entry `file_id` into `local_path`, replacing any existing file.
    async fn download(&self, file_id: &str, local_path: &Path) -> Result<()>;
}

/// A configured backend that can open sessions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name used in a unit's `upload_to` list.
    fn name(&self) -> &str;

    /// Obtain or refresh credentials and open a session.
    async fn connect(&self) -> Result<Arc<dyn RemoteStorage>>;
}

/// Backend variants selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Hierarchical folder store addressed by opaque folder ids
    Drive,
    /// Flat object store addressed by key prefixes
    Cloud,
    /// Mounted network share
    Share,
}

impl BackendKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gdrive" => Some(BackendKind::Drive),
            "gcloud" => Some(BackendKind::Cloud),
            "share" => Some(BackendKind::Share),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Drive => "gdrive",
            BackendKind::Cloud => "gcloud",
            BackendKind::Share => "share",
        }
    }
}

/// Build one backend per configured storage section, keyed by backend name.
pub fn build_backends(storages: &RemoteStorages) -> HashMap<String, Arc<dyn Backend>> {
    let http = reqwest::Client::new();
    let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();

    if let Some(drive) = &storages.gdrive {
        backends.insert(
            BackendKind::Drive.as_str().to_string(),
            Arc::new(drive::DriveBackend::new(drive.clone(), http.clone())),
        );
    }
    if let Some(cloud) = &storages.gcloud {
        backends.insert(
            BackendKind::Cloud.as_str().to_string(),
            Arc::new(cloud::CloudBackend::new(cloud.clone(), http.clone())),
        );
    }
    if let Some(share) = &storages.share {
        backends.insert(
            BackendKind::Share.as_str().to_string(),
            Arc::new(share::ShareBackend::new(share.path.clone())),
        );
    }

    backends
}

/// Map a non-success HTTP status onto the error taxonomy.
pub(crate) async fn check_status(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{}: HTTP {} {}", context, status.as_u16(), body.trim());
    Err(match status.as_u16() {
        401 | 403 => KeeperError::Auth(message),
        404 => KeeperError::NotFound(message),
        _ => KeeperError::Transfer(message),
    })
}

/// Network failure while talking to a backend.
pub(crate) fn transfer_error(context: &str, e: reqwest::Error) -> KeeperError {
    KeeperError::Transfer(format!("{}: {}", context, e))
}

/// Stream a download response into `local_path`, replacing any existing file.
pub(crate) async fn save_response(response: reqwest::Response, local_path: &Path) -> Result<u64> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(local_path)
        .await
        .map_err(|e| KeeperError::filesystem(local_path, e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transfer_error("download interrupted", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| KeeperError::filesystem(local_path, e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| KeeperError::filesystem(local_path, e))?;

    Ok(written)
}

/// Base name of a local file, used as the remote entry name.
pub(crate) fn upload_name(local_path: &Path) -> Result<String> {
    local_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| KeeperError::Config(format!("{} has no file name", local_path.display())))
}
