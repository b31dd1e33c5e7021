//! Hierarchical folder store backed by the Drive v3 REST API.

use super::oauth::{ClientSecrets, OAuthToken, DRIVE_SCOPE};
use super::resolver::{self, FolderApi};
use super::{check_status, save_response, transfer_error, upload_name, Backend, BackendKind};
use super::{RemoteFile, RemoteStorage, FOLDER_MIME_TYPE};
use crate::config::DriveConfig;
use crate::transfer::progress_stream::file_body;
use crate::utils::errors::{KeeperError, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, LOCATION};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const ROOT_FOLDER: &str = "root";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,size,mimeType,parents)";

pub struct DriveBackend {
    config: DriveConfig,
    http: reqwest::Client,
}

impl DriveBackend {
    pub fn new(config: DriveConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Consent page the operator opens to authorize offline access.
    pub fn authorization_url(&self) -> Result<String> {
        ClientSecrets::load(&self.config.credentials_file)?.authorization_url(DRIVE_SCOPE)
    }

    /// Exchange the code shown after consent and persist the token file.
    pub async fn complete_authorization(&self, code: &str) -> Result<()> {
        let secrets = ClientSecrets::load(&self.config.credentials_file)?;
        let token = secrets.exchange_code(&self.http, code).await?;
        token.save(&self.config.token_file)?;
        info!("Drive token saved to {}", self.config.token_file.display());
        Ok(())
    }

    /// Load the persisted token, refreshing and re-saving it when it is
    /// about to expire.
    async fn access_token(&self) -> Result<OAuthToken> {
        let token = OAuthToken::load(&self.config.token_file)?;
        if !token.expires_within(Utc::now(), Duration::seconds(60)) {
            return Ok(token);
        }

        let secrets = ClientSecrets::load(&self.config.credentials_file)?;
        let fresh = secrets.refresh(&self.http, &token).await?;
        if let Err(e) = fresh.save(&self.config.token_file) {
            warn!("Refreshed Drive token could not be persisted: {}", e);
        }
        Ok(fresh)
    }
}

#[async_trait]
impl Backend for DriveBackend {
    fn name(&self) -> &str {
        BackendKind::Drive.as_str()
    }

    async fn connect(&self) -> Result<Arc<dyn RemoteStorage>> {
        let token = self.access_token().await?;
        let session = DriveSession::new(self.http.clone(), &self.config.api_base, &token);
        session.verify().await?;
        Ok(Arc::new(session))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    /// Drive encodes int64 as a JSON string
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Authenticated Drive session.
pub struct DriveSession {
    http: reqwest::Client,
    api_base: String,
    authorization: String,
    /// Folder id to name, filled while listing
    parent_names: Mutex<HashMap<String, String>>,
}

impl DriveSession {
    pub fn new(http: reqwest::Client, api_base: &str, token: &OAuthToken) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            authorization: token.authorization_header(),
            parent_names: Mutex::new(HashMap::new()),
        }
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.api_base)
    }

    async fn verify(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/drive/v3/about", self.api_base))
            .query(&[("fields", "user")])
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transfer_error("Drive session check", e))?;
        check_status(response, "Drive session check").await?;
        Ok(())
    }

    async fn query(&self, q: &str, page_token: Option<&str>) -> Result<FileList> {
        let mut request = self
            .http
            .get(self.files_url())
            .query(&[("q", q), ("fields", LIST_FIELDS), ("pageSize", "1000")])
            .header(AUTHORIZATION, &self.authorization);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transfer_error("Drive file query", e))?;
        check_status(response, "Drive file query")
            .await?
            .json()
            .await
            .map_err(|e| transfer_error("Drive file query", e))
    }

    async fn parent_name(&self, id: &str) -> Result<String> {
        if let Some(name) = self.cached_name(id) {
            return Ok(name);
        }

        let response = self
            .http
            .get(format!("{}/{}", self.files_url(), id))
            .query(&[("fields", "id,name")])
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transfer_error("Drive parent lookup", e))?;
        let file: DriveFile = check_status(response, "Drive parent lookup")
            .await?
            .json()
            .await
            .map_err(|e| transfer_error("Drive parent lookup", e))?;

        if let Ok(mut names) = self.parent_names.lock() {
            names.insert(id.to_string(), file.name.clone());
        }
        Ok(file.name)
    }

    fn cached_name(&self, id: &str) -> Option<String> {
        self.parent_names
            .lock()
            .ok()
            .and_then(|names| names.get(id).cloned())
    }
}

/// Quote a value for a Drive search query.
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl FolderApi for DriveSession {
    fn root_id(&self) -> &str {
        ROOT_FOLDER
    }

    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let q = format!(
            "name = '{}' and '{}' in parents and mimeType = '{}' and trashed = false",
            quote(name),
            quote(parent_id),
            FOLDER_MIME_TYPE
        );
        let list = self.query(&q, None).await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let response = self
            .http
            .post(self.files_url())
            .query(&[("fields", "id")])
            .header(AUTHORIZATION, &self.authorization)
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await
            .map_err(|e| transfer_error("Drive folder create", e))?;
        let folder: DriveFile = check_status(response, "Drive folder create")
            .await?
            .json()
            .await
            .map_err(|e| transfer_error("Drive folder create", e))?;

        if let Ok(mut names) = self.parent_names.lock() {
            names.insert(folder.id.clone(), name.to_string());
        }
        Ok(folder.id)
    }
}

#[async_trait]
impl RemoteStorage for DriveSession {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<String> {
        let name = upload_name(local_path)?;
        let (body, size) = file_body(local_path, &name)
            .await
            .map_err(|e| KeeperError::filesystem(local_path, e))?;
        let folder_id = resolver::resolve_or_create(self, remote_path).await?;

        let response = self
            .http
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .header(AUTHORIZATION, &self.authorization)
            .header("X-Upload-Content-Length", size)
            .json(&serde_json::json!({ "name": name, "parents": [folder_id] }))
            .send()
            .await
            .map_err(|e| transfer_error("Drive upload session", e))?;
        let response = check_status(response, "Drive upload session").await?;
        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| KeeperError::Transfer("Drive upload session without Location".into()))?;

        debug!("Streaming {} ({} bytes) to Drive folder {}", name, size, folder_id);
        let response = self
            .http
            .put(session_url)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_error("Drive upload", e))?;
        let file: DriveFile = check_status(response, "Drive upload")
            .await?
            .json()
            .await
            .map_err(|e| transfer_error("Drive upload", e))?;

        Ok(file.id)
    }

    async fn list(&self, remote_path: &str) -> Result<Vec<RemoteFile>> {
        let folder_id = resolver::resolve_existing(self, remote_path).await?;
        let q = format!("'{}' in parents and trashed = false", quote(&folder_id));

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.query(&q, page_token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let mut parents = Vec::with_capacity(file.parents.len());
            for parent_id in &file.parents {
                parents.push(self.parent_name(parent_id).await?);
            }
            entries.push(RemoteFile {
                size: file
                    .size
                    .as_deref()
                    .and_then(|size| size.parse().ok())
                    .unwrap_or(0),
                id: file.id,
                name: file.name,
                parents,
                mime_type: file.mime_type,
            });
        }

        Ok(entries)
    }

    async fn download(&self, file_id: &str, local_path: &Path) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/{}", self.files_url(), file_id))
            .query(&[("alt", "media")])
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transfer_error("Drive download", e))?;
        let response = check_status(response, "Drive download").await?;
        let written = save_response(response, local_path).await?;
        debug!("Downloaded Drive file {} ({} bytes)", file_id, written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Path as UrlPath, Query, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    struct Entry {
        id: String,
        name: String,
        parent: String,
        mime_type: String,
        data: Vec<u8>,
    }

    #[derive(Default)]
    struct MockDrive {
        base_url: String,
        entries: Vec<Entry>,
        pending: HashMap<String, (String, String)>,
        next_id: usize,
        folder_creates: usize,
    }

    impl MockDrive {
        fn next_id(&mut self) -> String {
            self.next_id += 1;
            format!("id{}", self.next_id)
        }
    }

    type Shared = Arc<Mutex<MockDrive>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            == Some("Bearer good")
    }

    /// Extract (folder name, parent id) from the two query shapes the session sends.
    fn parse_query(q: &str) -> (Option<String>, String) {
        if let Some(rest) = q.strip_prefix("name = '") {
            let (name, rest) = rest.split_once("' and '").unwrap();
            let parent = rest.split_once("' in parents").unwrap().0;
            (Some(name.to_string()), parent.to_string())
        } else {
            let rest = q.strip_prefix('\'').unwrap();
            (None, rest.split_once("' in parents").unwrap().0.to_string())
        }
    }

    async fn about(headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Json(json!({"user": {"displayName": "backup"}})).into_response()
    }

    async fn list_files(
        State(state): State<Shared>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let (name, parent) = parse_query(params.get("q").map(String::as_str).unwrap_or(""));
        let drive = state.lock().unwrap();
        let files: Vec<Value> = drive
            .entries
            .iter()
            .filter(|e| e.parent == parent)
            .filter(|e| match &name {
                Some(name) => &e.name == name && e.mime_type == FOLDER_MIME_TYPE,
                None => true,
            })
            .map(|e| {
                json!({
                    "id": e.id,
                    "name": e.name,
                    "mimeType": e.mime_type,
                    "size": e.data.len().to_string(),
                    "parents": [e.parent],
                })
            })
            .collect();
        Json(json!({ "files": files })).into_response()
    }

    async fn get_file(
        State(state): State<Shared>,
        UrlPath(id): UrlPath<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let drive = state.lock().unwrap();
        let Some(entry) = drive.entries.iter().find(|e| e.id == id) else {
            return (StatusCode::NOT_FOUND, "file not found").into_response();
        };
        if params.get("alt").map(String::as_str) == Some("media") {
            return entry.data.clone().into_response();
        }
        Json(json!({"id": entry.id, "name": entry.name})).into_response()
    }

    async fn create_folder(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
        let mut drive = state.lock().unwrap();
        let id = drive.next_id();
        drive.folder_creates += 1;
        drive.entries.push(Entry {
            id: id.clone(),
            name: body["name"].as_str().unwrap().to_string(),
            parent: body["parents"][0].as_str().unwrap().to_string(),
            mime_type: body["mimeType"].as_str().unwrap().to_string(),
            data: Vec::new(),
        });
        Json(json!({ "id": id })).into_response()
    }

    async fn start_upload(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
        let mut drive = state.lock().unwrap();
        let session = drive.next_id();
        drive.pending.insert(
            session.clone(),
            (
                body["name"].as_str().unwrap().to_string(),
                body["parents"][0].as_str().unwrap().to_string(),
            ),
        );
        let location = format!("{}/upload/session/{}", drive.base_url, session);
        (StatusCode::OK, [(header::LOCATION, location)]).into_response()
    }

    async fn finish_upload(
        State(state): State<Shared>,
        UrlPath(session): UrlPath<String>,
        body: Bytes,
    ) -> Response {
        let mut drive = state.lock().unwrap();
        let Some((name, parent)) = drive.pending.remove(&session) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let id = drive.next_id();
        drive.entries.push(Entry {
            id: id.clone(),
            name,
            parent,
            mime_type: "application/zip".into(),
            data: body.to_vec(),
        });
        Json(json!({ "id": id })).into_response()
    }

    async fn token() -> Json<Value> {
        Json(json!({"access_token": "good", "token_type": "Bearer", "expires_in": 3600}))
    }

    async fn spawn_mock_drive() -> (String, Shared) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let state: Shared = Arc::new(Mutex::new(MockDrive {
            base_url: base_url.clone(),
            ..Default::default()
        }));
        let app = Router::new()
            .route("/drive/v3/about", get(about))
            .route("/drive/v3/files", get(list_files).post(create_folder))
            .route("/drive/v3/files/{id}", get(get_file))
            .route("/upload/drive/v3/files", post(start_upload))
            .route("/upload/session/{session}", put(finish_upload))
            .route("/token", post(token))
            .with_state(state.clone());
        tokio::spawn(std::future::IntoFuture::into_future(axum::serve(listener, app)));
        (base_url, state)
    }

    fn backend(dir: &TempDir, base_url: &str, access_token: &str, expired: bool) -> DriveBackend {
        let credentials_file = dir.path().join("client.json");
        std::fs::write(
            &credentials_file,
            json!({"installed": {
                "client_id": "client",
                "client_secret": "secret",
                "auth_uri": format!("{}/auth", base_url),
                "token_uri": format!("{}/token", base_url),
            }})
            .to_string(),
        )
        .unwrap();

        let token_file = dir.path().join("token.json");
        OAuthToken {
            access_token: access_token.into(),
            token_type: "Bearer".into(),
            refresh_token: Some("refresh".into()),
            expiry: Some(if expired {
                Utc::now() - Duration::hours(1)
            } else {
                Utc::now() + Duration::hours(1)
            }),
        }
        .save(&token_file)
        .unwrap();

        DriveBackend::new(
            DriveConfig {
                credentials_file,
                token_file,
                api_base: base_url.to_string(),
            },
            reqwest::Client::new(),
        )
    }

    fn archive(dir: &TempDir, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("23-10:34-db.zip");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_creates_folders_once() {
        let (base_url, state) = spawn_mock_drive().await;
        let dir = TempDir::new().unwrap();
        let session = backend(&dir, &base_url, "good", false).connect().await.unwrap();
        let local = archive(&dir, b"archive bytes");

        let id = session.upload(&local, "servers/db/2024-02").await.unwrap();
        assert_eq!(state.lock().unwrap().folder_creates, 3);

        session.upload(&local, "servers/db/2024-02").await.unwrap();
        let drive = state.lock().unwrap();
        assert_eq!(drive.folder_creates, 3);
        let uploaded = drive.entries.iter().find(|e| e.id == id).unwrap();
        assert_eq!(uploaded.name, "23-10:34-db.zip");
        assert_eq!(uploaded.data, b"archive bytes");
    }

    #[tokio::test]
    async fn test_list_resolves_parent_names() {
        let (base_url, _state) = spawn_mock_drive().await;
        let dir = TempDir::new().unwrap();
        let session = backend(&dir, &base_url, "good", false).connect().await.unwrap();
        session
            .upload(&archive(&dir, b"12345"), "servers/db/2024-02")
            .await
            .unwrap();

        let files = session.list("servers/db/2024-02").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "23-10:34-db.zip");
        assert_eq!(files[0].size, 5);
        assert_eq!(files[0].parents, vec!["2024-02"]);
        assert!(!files[0].is_dir());

        let folders = session.list("servers").await.unwrap();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].is_dir());
    }

    #[tokio::test]
    async fn test_list_missing_path_is_not_found() {
        let (base_url, state) = spawn_mock_drive().await;
        let dir = TempDir::new().unwrap();
        let session = backend(&dir, &base_url, "good", false).connect().await.unwrap();

        let err = session.list("servers/absent").await.unwrap_err();
        assert!(matches!(err, KeeperError::NotFound(_)));
        assert_eq!(state.lock().unwrap().folder_creates, 0);
    }

    #[tokio::test]
    async fn test_download_overwrites_local_file() {
        let (base_url, _state) = spawn_mock_drive().await;
        let dir = TempDir::new().unwrap();
        let session = backend(&dir, &base_url, "good", false).connect().await.unwrap();
        let id = session
            .upload(&archive(&dir, b"fresh content"), "db")
            .await
            .unwrap();

        let target = dir.path().join("restored.zip");
        std::fs::write(&target, b"stale content that is longer").unwrap();
        session.download(&id, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"fresh content");

        let err = session.download("missing", &target).await.unwrap_err();
        assert!(matches!(err, KeeperError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejected_token_is_auth_error() {
        let (base_url, _state) = spawn_mock_drive().await;
        let dir = TempDir::new().unwrap();
        let err = backend(&dir, &base_url, "revoked", false)
            .connect()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KeeperError::Auth(_)));
    }

    #[tokio::test]
    async fn test_missing_token_file_is_auth_error() {
        let (base_url, _state) = spawn_mock_drive().await;
        let dir = TempDir::new().unwrap();
        let drive = backend(&dir, &base_url, "good", false);
        std::fs::remove_file(&drive.config.token_file).unwrap();

        let err = drive.connect().await.err().unwrap();
        assert!(matches!(err, KeeperError::Auth(_)));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_saved() {
        let (base_url, _state) = spawn_mock_drive().await;
        let dir = TempDir::new().unwrap();
        let drive = backend(&dir, &base_url, "stale", true);

        drive.connect().await.unwrap();

        let saved = OAuthToken::load(&drive.config.token_file).unwrap();
        assert_eq!(saved.access_token, "good");
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh"));
    }

    #[test]
    fn test_query_quoting() {
        assert_eq!(quote("it's"), "it\\'s");
        assert_eq!(quote("a\\b"), "a\\\\b");
    }
}
