use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, StatusCode};

use crate::error::{AppError, Result};

/// External blob storage for archived time series. Implementations must be
/// safe to call from many tasks at once.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

pub struct DirArchiveStore {
    dir: PathBuf,
}

impl DirArchiveStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl ArchiveStore for DirArchiveStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.dir.join(key)).await?)
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        // Write then rename so a reader never sees a partial file.
        let tmp = self.dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.dir.join(key)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP object store (HEAD / PUT)
// ---------------------------------------------------------------------------

pub struct HttpArchiveStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchiveStore {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }
}

#[async_trait]
impl ArchiveStore for HttpArchiveStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self.client.head(self.url(key)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(AppError::Archive(format!("HEAD {key} returned {s}"))),
        }
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let resp = self
            .client
            .put(self.url(key))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::Archive(format!("PUT {key} returned {}", resp.status())));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps objects in memory. Uploads for keys marked with
/// [`fail_uploads_for`](Self::fail_uploads_for) are rejected.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryArchiveStore {
    objects: dashmap::DashMap<String, (String, Vec<u8>)>,
    failing: dashmap::DashSet<String>,
}

#[cfg(test)]
impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads_for(&self, key: &str) {
        self.failing.insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    /// Content type and body of a stored object.
    pub fn get(&self, key: &str) -> Option<(String, Vec<u8>)> {
        self.objects.get(key).map(|e| e.value().clone())
    }
}

#[cfg(test)]
#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        if self.failing.contains(key) {
            return Err(AppError::Archive(format!("upload of {key} rejected")));
        }
        self.objects.insert(key.to_string(), (content_type.to_string(), bytes));
        Ok(())
    }
}
