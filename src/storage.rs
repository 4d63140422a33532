//! Durable object storage client. Resolved assets are uploaded here and
//! served from public URLs the platform can fetch.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;

use crate::config::Config;

#[async_trait]
pub trait StorageService: Send + Sync {
    /// Upload with upsert semantics: re-uploading the same path overwrites.
    async fn upload(&self, path: &str, content: Bytes, content_type: &str) -> Result<()>;

    /// Public, unauthenticated URL for an uploaded object.
    fn public_url(&self, path: &str) -> String;
}

#[derive(Clone)]
pub struct StorageClient {
    http: Client,
    base_url: Url,
    bucket: String,
    service_key: String,
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("base_url", &self.base_url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.storage.base_url).context("invalid storage base URL")?;
        Ok(Self::with_base_url(
            base_url,
            cfg.storage.bucket.clone(),
            cfg.storage.service_key.clone(),
            Duration::from_secs(cfg.app.http_timeout_seconds),
        ))
    }

    pub fn with_base_url(
        base_url: Url,
        bucket: String,
        service_key: String,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .user_agent("meta-publisher/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            bucket,
            service_key,
        }
    }
}

#[async_trait]
impl StorageService for StorageClient {
    async fn upload(&self, path: &str, content: Bytes, content_type: &str) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("storage/v1/object/{}/{}", self.bucket, path))
            .context("invalid storage URL")?;
        let res = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(content)
            .send()
            .await
            .context("failed to reach object storage")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("storage upload error {}: {}", status, body));
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}
