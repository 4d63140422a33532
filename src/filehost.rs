//! Client for the third-party file host that holds original uploads.
//!
//! Uploads land on the host from the admin UI and are only reachable with an
//! API key, so the pipeline copies them into durable storage before any
//! platform call (see `assets`).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;

use crate::config::Config;

/// Binary content fetched from the host, with its reported content type.
#[derive(Debug, Clone)]
pub struct HostedFile {
    pub content: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait FileHostService: Send + Sync {
    async fn download(&self, file_id: &str) -> Result<HostedFile>;
}

#[derive(Clone)]
pub struct FileHostClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for FileHostClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHostClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl FileHostClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.filehost.base_url).context("invalid file host base URL")?;
        Ok(Self::with_base_url(
            base_url,
            cfg.filehost.api_key.clone(),
            Duration::from_secs(cfg.app.http_timeout_seconds),
        ))
    }

    pub fn with_base_url(base_url: Url, api_key: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("meta-publisher/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl FileHostService for FileHostClient {
    async fn download(&self, file_id: &str) -> Result<HostedFile> {
        let url = self
            .base_url
            .join(&format!("files/{}/content", file_id))
            .context("invalid file host URL")?;
        let res = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .context("failed to reach file host")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("file host error {}: {}", status, body));
        }

        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let content = res
            .bytes()
            .await
            .context("failed to read file host response body")?;
        Ok(HostedFile {
            content,
            content_type,
        })
    }
}
