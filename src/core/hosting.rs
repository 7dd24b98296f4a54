//! Storage backend of the admin surface: files in a hosted repository,
//! read and written through a contents API that versions every file with an
//! opaque hash (`sha`). A write must carry the hash it was based on; the
//! backend refuses it when the file moved on in the meantime.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, Once},
};

use async_trait::async_trait;
use awc::{
    http::{header, Method, StatusCode},
    Client, ClientRequest,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{core::settings::Settings, error::AppError};

const USER_AGENT: &str = concat!("vitrine/", env!("CARGO_PKG_VERSION"));
const BODY_LIMIT: usize = 64 * 1024 * 1024;

static CRYPTO_PROVIDER: Once = Once::new();

/// HTTP client for outgoing calls. rustls has no process-wide crypto
/// provider until one is installed, so the first call installs ring.
pub fn http_client() -> Client {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("A rustls crypto provider was already installed");
        }
    });
    Client::default()
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteFile {
    pub content: Vec<u8>,
    pub sha: String,
}

#[async_trait(?Send)]
pub trait ContentStore {
    /// Login of the account owning `token`.
    async fn current_user(&self, token: &str) -> Result<String, AppError>;

    /// `None` when nothing exists at `path` yet.
    async fn fetch(&self, token: &str, path: &str) -> Result<Option<RemoteFile>, AppError>;

    /// Creates (`sha` = `None`) or replaces the file and returns its new hash.
    async fn put(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<String, AppError>;
}

pub fn encode_content(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a contents API body; the API wraps base64 at 60 columns.
pub fn decode_content(encoded: &str) -> Result<Vec<u8>, AppError> {
    let clean: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    Ok(STANDARD.decode(clean)?)
}

#[derive(Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Deserialize)]
struct WrittenContent {
    sha: String,
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

pub struct GithubStore {
    api_root: String,
    owner: String,
    repo: String,
}

impl GithubStore {
    pub fn new(api_root: &str, owner: &str, repo: &str) -> Self {
        GithubStore {
            api_root: api_root.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        GithubStore::new(
            &settings.api_root.value,
            &settings.repo_owner.value,
            &settings.repo_name.value,
        )
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_root,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, client: &Client, method: Method, url: &str, token: &str) -> ClientRequest {
        client
            .request(method, url)
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
            .insert_header((header::ACCEPT, "application/vnd.github+json"))
            .insert_header((header::USER_AGENT, USER_AGENT))
    }
}

#[async_trait(?Send)]
impl ContentStore for GithubStore {
    async fn current_user(&self, token: &str) -> Result<String, AppError> {
        let client = http_client();
        let url = format!("{}/user", self.api_root);
        let mut response = self
            .request(&client, Method::GET, &url, token)
            .send()
            .await
            .map_err(|error| {
                warn!("Could not reach {}: {}", url, error);
                AppError::Unauthorized
            })?;

        if !response.status().is_success() {
            warn!("Token rejected with status {}", response.status());
            return Err(AppError::Unauthorized);
        }

        let user: UserResponse = response.json().await.map_err(|error| {
            warn!("Unexpected user payload: {}", error);
            AppError::Unauthorized
        })?;
        Ok(user.login)
    }

    async fn fetch(&self, token: &str, path: &str) -> Result<Option<RemoteFile>, AppError> {
        let client = http_client();
        let url = self.contents_url(path);
        let fallback = format!("Unable to load {}", path);

        let mut response = self
            .request(&client, Method::GET, &url, token)
            .send()
            .await
            .map_err(|error| {
                warn!("Request for {} failed: {}", path, error);
                AppError::hosting(None, fallback.as_str())
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!("{} does not exist yet", path);
            return Ok(None);
        }

        let body = response
            .body()
            .limit(BODY_LIMIT)
            .await
            .map_err(|error| {
                warn!("Could not read {}: {}", path, error);
                AppError::hosting(Some(status.as_u16()), fallback.as_str())
            })?;

        if !status.is_success() {
            return Err(api_error(status, &body, fallback));
        }

        let payload: ContentResponse =
            serde_json::from_slice(&body).map_err(|error| AppError::malformed(path, error))?;
        Ok(Some(RemoteFile {
            content: decode_content(&payload.content)?,
            sha: payload.sha,
        }))
    }

    async fn put(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<String, AppError> {
        let client = http_client();
        let url = self.contents_url(path);
        let fallback = format!("Unable to update {}", path);

        let request = WriteRequest {
            message,
            content: encode_content(content),
            sha,
        };

        let mut response = self
            .request(&client, Method::PUT, &url, token)
            .send_json(&request)
            .await
            .map_err(|error| {
                warn!("Write to {} failed: {}", path, error);
                AppError::hosting(None, fallback.as_str())
            })?;

        let status = response.status();
        let body = response
            .body()
            .limit(BODY_LIMIT)
            .await
            .map_err(|error| {
                warn!("Could not read write response for {}: {}", path, error);
                AppError::hosting(Some(status.as_u16()), fallback.as_str())
            })?;

        if !status.is_success() {
            return Err(api_error(status, &body, fallback));
        }

        let written: WriteResponse =
            serde_json::from_slice(&body).map_err(|error| AppError::malformed(path, error))?;
        info!("Wrote {} ({} bytes)", path, content.len());
        Ok(written.content.sha)
    }
}

fn api_error(status: StatusCode, body: &[u8], fallback: String) -> AppError {
    let message = serde_json::from_slice::<ApiMessage>(body)
        .ok()
        .and_then(|payload| payload.message)
        .unwrap_or(fallback);
    warn!("Hosting API answered {}: {}", status, message);
    AppError::hosting(Some(status.as_u16()), message)
}

/// Contents API kept in memory, with the same hash rules as the hosted one.
pub struct MemoryStore {
    token: String,
    files: Mutex<HashMap<String, RemoteFile>>,
}

impl MemoryStore {
    pub fn new(token: &str) -> Self {
        MemoryStore {
            token: token.to_string(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `content` at `path` out of band, as a concurrent editor would.
    pub fn seed(&self, path: &str, content: impl Into<Vec<u8>>) -> String {
        let sha = new_sha();
        self.files().insert(
            path.to_string(),
            RemoteFile {
                content: content.into(),
                sha: sha.clone(),
            },
        );
        sha
    }

    pub fn file(&self, path: &str) -> Option<RemoteFile> {
        self.files().get(path).cloned()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, RemoteFile>> {
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authorize(&self, token: &str) -> Result<(), AppError> {
        if token == self.token {
            Ok(())
        } else {
            Err(AppError::hosting(Some(401), "Bad credentials"))
        }
    }
}

#[async_trait(?Send)]
impl ContentStore for MemoryStore {
    async fn current_user(&self, token: &str) -> Result<String, AppError> {
        self.authorize(token).map_err(|_| AppError::Unauthorized)?;
        Ok("operator".to_string())
    }

    async fn fetch(&self, token: &str, path: &str) -> Result<Option<RemoteFile>, AppError> {
        self.authorize(token)?;
        Ok(self.file(path))
    }

    async fn put(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        _message: &str,
    ) -> Result<String, AppError> {
        self.authorize(token)?;
        let mut files = self.files();
        match (files.get(path), sha) {
            (Some(existing), Some(sha)) if existing.sha == sha => {}
            (None, None) => {}
            (Some(_), None) => {
                return Err(AppError::hosting(
                    Some(422),
                    "Invalid request. \"sha\" wasn't supplied.",
                ))
            }
            (_, Some(sha)) => {
                return Err(AppError::hosting(
                    Some(409),
                    format!("{} does not match {}", path, sha),
                ))
            }
        }

        let sha = new_sha();
        files.insert(
            path.to_string(),
            RemoteFile {
                content: content.to_vec(),
                sha: sha.clone(),
            },
        );
        Ok(sha)
    }
}

fn new_sha() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn http_client_builds_with_installed_provider() {
        let _first = http_client();
        let _second = http_client();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }

    #[test]
    fn decode_ignores_line_wrapping() {
        let encoded = encode_content(b"[{\"name\":\"Clip\"}]");
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("{}\n{}\n", head, tail);
        assert_eq!(decode_content(&wrapped).unwrap(), b"[{\"name\":\"Clip\"}]");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_content("not base64!"),
            Err(AppError::Encoding(_))
        ));
    }

    #[test]
    fn contents_url_is_built_from_repository() {
        let store = GithubStore::new("https://api.github.com/", "atelier", "atelier.github.io");
        assert_eq!(
            store.contents_url("data/products.json"),
            "https://api.github.com/repos/atelier/atelier.github.io/contents/data/products.json"
        );
    }

    #[actix_web::test]
    async fn memory_store_rejects_stale_hash() {
        let store = MemoryStore::new("token");
        let first = store.seed("data/products.json", "[]");
        let second = store
            .put("token", "data/products.json", b"[1]", Some(&first), "edit")
            .await
            .unwrap();
        assert_ne!(first, second);

        let error = store
            .put("token", "data/products.json", b"[2]", Some(&first), "edit")
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Hosting { status: Some(409), .. }));
        assert_eq!(store.file("data/products.json").unwrap().content, b"[1]");
    }

    #[actix_web::test]
    async fn memory_store_requires_hash_to_replace() {
        let store = MemoryStore::new("token");
        store.seed("images/a.jpg", vec![1, 2, 3]);
        let error = store
            .put("token", "images/a.jpg", &[4], None, "upload")
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Hosting { status: Some(422), .. }));
    }

    #[actix_web::test]
    async fn memory_store_checks_token() {
        let store = MemoryStore::new("token");
        assert!(matches!(
            store.current_user("other").await,
            Err(AppError::Unauthorized)
        ));
        assert!(store.fetch("other", "data/products.json").await.is_err());
        assert_eq!(store.current_user("token").await.unwrap(), "operator");
    }
}
