use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use awc::http::header;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::{core::hosting::http_client, error::AppError, types::Collection};

const BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Where the public site's static files live.
#[derive(Clone, Debug, PartialEq)]
pub enum SiteRoot {
    Local(PathBuf),
    Remote(String),
}

impl SiteRoot {
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            SiteRoot::Remote(value.trim_end_matches('/').to_string())
        } else {
            SiteRoot::Local(PathBuf::from(value))
        }
    }
}

/// Read-only view of the JSON files the public pages render. Every path is
/// kept in memory after its first successful read.
pub struct SiteReader {
    root: SiteRoot,
    cache: Mutex<HashMap<String, Value>>,
}

impl SiteReader {
    pub fn new(root: SiteRoot) -> Self {
        SiteReader {
            root,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn collection<T: DeserializeOwned>(&self, collection: Collection) -> Result<T, AppError> {
        let path = collection.path();
        let value = self.fetch_json(path).await?;
        serde_json::from_value(value).map_err(|error| AppError::malformed(path, error))
    }

    pub async fn fetch_json(&self, path: &str) -> Result<Value, AppError> {
        if let Some(value) = self.cache().get(path) {
            return Ok(value.clone());
        }

        let value = match &self.root {
            SiteRoot::Local(dir) => load_from_storage(dir, path)?,
            SiteRoot::Remote(base) => load_from_cdn(base, path).await?,
        };
        self.cache().insert(path.to_string(), value.clone());
        Ok(value)
    }

    /// Drops memoised files so the next read sees fresh content.
    pub fn invalidate(&self) {
        self.cache().clear();
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_from_storage(dir: &Path, path: &str) -> Result<Value, AppError> {
    let full_path = dir.join(path);
    let file = File::open(&full_path).map_err(|error| {
        warn!("Error opening {}: {}", full_path.display(), error);
        AppError::NotFound(path.to_string())
    })?;
    let mut buffer = Vec::new();
    BufReader::new(file).read_to_end(&mut buffer)?;
    info!("Read {} ({} bytes)", full_path.display(), buffer.len());
    serde_json::from_slice(&buffer).map_err(|error| AppError::malformed(path, error))
}

async fn load_from_cdn(base: &str, path: &str) -> Result<Value, AppError> {
    let client = http_client();
    let url = format!("{}/{}", base, path);
    let unavailable = || AppError::hosting(None, format!("Unable to load {}", path));

    let mut response = client
        .get(&url)
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .send()
        .await
        .map_err(|error| {
            warn!("Error requesting {}: {}", url, error);
            unavailable()
        })?;
    if !response.status().is_success() {
        warn!("{} answered {}", url, response.status());
        return Err(unavailable());
    }

    let body = response.body().limit(BODY_LIMIT).await.map_err(|error| {
        warn!("{} could not be read: {}", url, error);
        unavailable()
    })?;
    info!("Fetched {} ({} bytes)", url, body.len());
    serde_json::from_slice(&body).map_err(|error| AppError::malformed(path, error))
}
