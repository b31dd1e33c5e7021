//! OAuth2 credentials for the Google backends.
//!
//! The Drive backend uses the installed-application flow: a client secrets
//! file plus a persisted token holding a refresh token. The Cloud backend
//! uses a service account whose signed JWT assertion is exchanged for a
//! short-lived access token.

use crate::utils::errors::{KeeperError, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

const OUT_OF_BAND_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Access token as persisted in the token file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthToken {
    /// Read a token file. A missing or unreadable file is an auth failure.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeeperError::Auth(format!(
                "cannot read token file {} ({}); run `kk authorize` first",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| KeeperError::Auth(format!("malformed token file {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| KeeperError::filesystem(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| KeeperError::filesystem(path, e))
    }

    /// True when the token expires before `now + leeway`. A token without
    /// expiry (or with the zero timestamp) never expires.
    pub fn expires_within(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.expiry
            .filter(|expiry| expiry.timestamp() > 0)
            .is_some_and(|expiry| expiry <= now + leeway)
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(default_token_type),
            refresh_token: response.refresh_token.or(previous_refresh),
            expiry: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth client registered for the installed-application flow.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse a client secrets file from the API console (`installed` or `web` section).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeeperError::Auth(format!("cannot read client credentials {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| KeeperError::Auth(format!("{}: {}", path.display(), e)))
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let file: ClientSecretsFile = serde_json::from_str(content).map_err(|e| e.to_string())?;
        file.installed
            .or(file.web)
            .ok_or_else(|| "neither an 'installed' nor a 'web' client section".to_string())
    }

    fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(OUT_OF_BAND_REDIRECT)
    }

    /// Consent page URL requesting offline access for `scope`.
    pub fn authorization_url(&self, scope: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.auth_uri,
            &[
                ("access_type", "offline"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("response_type", "code"),
                ("scope", scope),
                ("state", "state-token"),
            ],
        )
        .map_err(|e| KeeperError::Config(format!("invalid auth_uri '{}': {}", self.auth_uri, e)))?;
        Ok(url.to_string())
    }

    /// Trade an authorization code for a token carrying a refresh token.
    pub async fn exchange_code(&self, http: &reqwest::Client, code: &str) -> Result<OAuthToken> {
        let response = request_token(
            http,
            &self.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", code.trim()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri()),
            ],
        )
        .await?;
        Ok(OAuthToken::from_response(response, None))
    }

    /// Obtain a fresh access token. The refresh token is kept when the
    /// endpoint does not rotate it.
    pub async fn refresh(&self, http: &reqwest::Client, token: &OAuthToken) -> Result<OAuthToken> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| KeeperError::Auth("token expired and has no refresh token".into()))?;

        let response = request_token(
            http,
            &self.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ],
        )
        .await?;
        debug!("Refreshed OAuth access token");
        Ok(OAuthToken::from_response(response, token.refresh_token.clone()))
    }
}

/// Service-account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl ServiceAccount {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeeperError::Auth(format!(
                "cannot read service account credentials {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| KeeperError::Auth(format!("{}: {}", path.display(), e)))
    }

    /// Signed RS256 assertion for `scope`, valid for one hour from `issued_at`.
    fn assertion(&self, scope: &str, issued_at: i64) -> Result<String> {
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: scope.to_string(),
            aud: self.token_uri.clone(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| KeeperError::Auth(format!("invalid service account key: {}", e)))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| KeeperError::Auth(format!("cannot sign assertion: {}", e)))
    }

    pub async fn fetch_token(&self, http: &reqwest::Client, scope: &str) -> Result<OAuthToken> {
        let assertion = self.assertion(scope, Utc::now().timestamp())?;
        let response = request_token(
            http,
            &self.token_uri,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
        )
        .await?;
        Ok(OAuthToken::from_response(response, None))
    }
}

/// POST a form to a token endpoint. Every failure here is an auth failure.
async fn request_token(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .map_err(|e| KeeperError::Auth(format!("token endpoint {} unreachable: {}", token_uri, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(KeeperError::Auth(format!(
            "token endpoint returned HTTP {}: {}",
            status.as_u16(),
            body.trim()
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| KeeperError::Auth(format!("malformed token response: {}", e)))
}
