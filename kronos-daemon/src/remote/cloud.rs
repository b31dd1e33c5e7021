//! Flat object store backed by the Cloud Storage JSON API.
//!
//! Objects live in one bucket under `/`-separated names. There are no
//! folder objects: a logical folder exists while some object name starts
//! with its prefix, so uploads never create anything besides the object.

use super::oauth::{OAuthToken, ServiceAccount, STORAGE_SCOPE};
use super::resolver::split_path;
use super::{check_status, save_response, transfer_error, upload_name, Backend, BackendKind};
use super::{RemoteFile, RemoteStorage, FOLDER_MIME_TYPE};
use crate::config::CloudConfig;
use crate::transfer::progress_stream::file_body;
use crate::utils::errors::{KeeperError, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct CloudBackend {
    config: CloudConfig,
    http: reqwest::Client,
}

impl CloudBackend {
    pub fn new(config: CloudConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl Backend for CloudBackend {
    fn name(&self) -> &str {
        BackendKind::Cloud.as_str()
    }

    async fn connect(&self) -> Result<Arc<dyn RemoteStorage>> {
        let account = ServiceAccount::load(&self.config.credentials_file)?;
        let token = account.fetch_token(&self.http, STORAGE_SCOPE).await?;
        let session = CloudSession::new(
            self.http.clone(),
            &self.config.api_base,
            &self.config.bucket,
            &token,
        );
        session.verify().await?;
        Ok(Arc::new(session))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<StorageObject>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Authenticated session bound to one bucket.
pub struct CloudSession {
    http: reqwest::Client,
    api_base: String,
    bucket: String,
    authorization: String,
}

impl CloudSession {
    pub fn new(http: reqwest::Client, api_base: &str, bucket: &str, token: &OAuthToken) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            authorization: token.authorization_header(),
        }
    }

    /// `{api_base}{root}/storage/v1/b/{bucket}` followed by `segments`, each
    /// percent-encoded as a single path segment.
    fn url(&self, root: &str, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}{}/storage/v1/b", self.api_base, root))
            .map_err(|e| KeeperError::Config(format!("invalid api_base '{}': {}", self.api_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| KeeperError::Config(format!("api_base '{}' cannot hold a path", self.api_base)))?
            .push(&self.bucket)
            .extend(segments);
        Ok(url)
    }

    fn bucket_url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        self.url("", segments)
    }

    async fn verify(&self) -> Result<()> {
        let response = self
            .http
            .get(self.bucket_url(&[])?)
            .query(&[("fields", "name")])
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transfer_error("bucket check", e))?;
        check_status(response, &format!("bucket '{}'", self.bucket)).await?;
        Ok(())
    }

    async fn list_page(&self, prefix: &str, page_token: Option<&str>) -> Result<ObjectList> {
        let mut request = self
            .http
            .get(self.bucket_url(&["o"])?)
            .query(&[("prefix", prefix), ("delimiter", "/")])
            .header(AUTHORIZATION, &self.authorization);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transfer_error("object listing", e))?;
        check_status(response, "object listing")
            .await?
            .json()
            .await
            .map_err(|e| transfer_error("object listing", e))
    }
}

/// Object-name prefix of a logical folder: `a/b/`, or empty for the bucket root.
fn folder_prefix(remote_path: &str) -> String {
    let segments = split_path(remote_path);
    if segments.is_empty() {
        String::new()
    } else {
        format!("{}/", segments.join("/"))
    }
}

#[async_trait]
impl RemoteStorage for CloudSession {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<String> {
        let name = upload_name(local_path)?;
        let object_name = format!("{}{}", folder_prefix(remote_path), name);
        let (body, size) = file_body(local_path, &name)
            .await
            .map_err(|e| KeeperError::filesystem(local_path, e))?;

        let url = self.url("/upload", &["o"])?;

        debug!("Streaming {} ({} bytes) to gs://{}/{}", name, size, self.bucket, object_name);
        let response = self
            .http
            .post(url)
            .query(&[("uploadType", "media"), ("name", object_name.as_str())])
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_error("object upload", e))?;
        let object: StorageObject = check_status(response, "object upload")
            .await?
            .json()
            .await
            .map_err(|e| transfer_error("object upload", e))?;

        Ok(object.name)
    }

    async fn list(&self, remote_path: &str) -> Result<Vec<RemoteFile>> {
        let prefix = folder_prefix(remote_path);
        let parents: Vec<String> = split_path(remote_path).into_iter().map(String::from).collect();

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(&prefix, page_token.as_deref()).await?;

            for folder in page.prefixes {
                let name = folder
                    .strip_prefix(prefix.as_str())
                    .unwrap_or(folder.as_str())
                    .trim_end_matches('/')
                    .to_string();
                entries.push(RemoteFile {
                    id: folder,
                    name,
                    size: 0,
                    parents: parents.clone(),
                    mime_type: FOLDER_MIME_TYPE.to_string(),
                });
            }
            for object in page.items {
                entries.push(RemoteFile {
                    name: object
                        .name
                        .strip_prefix(prefix.as_str())
                        .unwrap_or(object.name.as_str())
                        .to_string(),
                    size: object
                        .size
                        .as_deref()
                        .and_then(|size| size.parse().ok())
                        .unwrap_or(0),
                    parents: parents.clone(),
                    mime_type: object
                        .content_type
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    id: object.name,
                });
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        if entries.is_empty() && !prefix.is_empty() {
            return Err(KeeperError::NotFound(format!(
                "no objects under gs://{}/{}",
                self.bucket, prefix
            )));
        }
        Ok(entries)
    }

    async fn download(&self, file_id: &str, local_path: &Path) -> Result<()> {
        let response = self
            .http
            .get(self.bucket_url(&["o", file_id])?)
            .query(&[("alt", "media")])
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transfer_error("object download", e))?;
        let response = check_status(response, "object download").await?;
        let written = save_response(response, local_path).await?;
        debug!("Downloaded gs://{}/{} ({} bytes)", self.bucket, file_id, written);
        Ok(())
    }
}
