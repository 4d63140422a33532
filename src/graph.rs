//! Graph API client: media container creation and publish calls.
//!
//! Publishing one post is a sequence of container creations followed by a
//! single publish call; carousels add one group container on top. Access
//! tokens travel as request parameters and are never logged.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: Url,
    version: String,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// The platform calls the pipeline issues. Publish calls are side-effecting
/// and not safely retriable; callers must not retry them automatically.
#[async_trait]
pub trait GraphService: Send + Sync {
    /// Create one single-image upload container. Returns the container id.
    async fn create_image_container(
        &self,
        ig_user_id: &str,
        access_token: &str,
        image_url: &str,
        caption: &str,
        is_carousel_item: bool,
    ) -> Result<String>;

    /// Create a carousel container over ordered child container ids.
    async fn create_carousel_container(
        &self,
        ig_user_id: &str,
        access_token: &str,
        children: &[String],
        caption: &str,
    ) -> Result<String>;

    /// Publish a finished container to the photo feed. Returns the media id.
    async fn publish_media(
        &self,
        ig_user_id: &str,
        access_token: &str,
        creation_id: &str,
    ) -> Result<String>;

    /// Publish a text post to a page feed. Returns the post id.
    async fn publish_page_feed(
        &self,
        page_id: &str,
        access_token: &str,
        message: &str,
    ) -> Result<String>;
}

impl GraphClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.graph.base_url).context("invalid Graph API base URL")?;
        Ok(Self::with_base_url(
            base_url,
            cfg.graph.version.clone(),
            Duration::from_secs(cfg.app.http_timeout_seconds),
        ))
    }

    pub fn with_base_url(base_url: Url, version: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("meta-publisher/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            version,
        }
    }

    fn endpoint(&self, node: &str, edge: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}/{}/{}", self.version, node, edge))
            .context("invalid Graph API URL")
    }

    async fn execute_post(&self, url: Url, params: &[(&'static str, String)]) -> Result<String> {
        info!(url = %url, "graph api request");
        let res = self
            .http
            .post(url)
            .form(params)
            .send()
            .await
            .context("failed to reach Graph API")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by Graph API: {}", body);
            return Err(anyhow!("received 429 from Graph API: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!("Graph API error - Status: {}, Body: {}", status, body);
            return Err(anyhow!("graph error {}: {}", status, body));
        }

        let payload: GraphIdResponse = res
            .json()
            .await
            .context("invalid Graph API response JSON")?;
        info!(id = %payload.id, "graph api object created");
        Ok(payload.id)
    }
}

#[async_trait]
impl GraphService for GraphClient {
    async fn create_image_container(
        &self,
        ig_user_id: &str,
        access_token: &str,
        image_url: &str,
        caption: &str,
        is_carousel_item: bool,
    ) -> Result<String> {
        let url = self.endpoint(ig_user_id, "media")?;
        let params = image_container_params(image_url, caption, access_token, is_carousel_item);
        self.execute_post(url, &params).await
    }

    async fn create_carousel_container(
        &self,
        ig_user_id: &str,
        access_token: &str,
        children: &[String],
        caption: &str,
    ) -> Result<String> {
        let url = self.endpoint(ig_user_id, "media")?;
        let params = carousel_container_params(children, caption, access_token);
        self.execute_post(url, &params).await
    }

    async fn publish_media(
        &self,
        ig_user_id: &str,
        access_token: &str,
        creation_id: &str,
    ) -> Result<String> {
        let url = self.endpoint(ig_user_id, "media_publish")?;
        let params = publish_params(creation_id, access_token);
        self.execute_post(url, &params).await
    }

    async fn publish_page_feed(
        &self,
        page_id: &str,
        access_token: &str,
        message: &str,
    ) -> Result<String> {
        let url = self.endpoint(page_id, "feed")?;
        let params = page_feed_params(message, access_token);
        self.execute_post(url, &params).await
    }
}

pub fn image_container_params(
    image_url: &str,
    caption: &str,
    access_token: &str,
    is_carousel_item: bool,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("image_url", image_url.to_string()),
        ("caption", caption.to_string()),
    ];
    if is_carousel_item {
        params.push(("is_carousel_item", "true".to_string()));
    }
    params.push(("access_token", access_token.to_string()));
    params
}

pub fn carousel_container_params(
    children: &[String],
    caption: &str,
    access_token: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("media_type", "CAROUSEL".to_string()),
        ("children", children.join(",")),
        ("caption", caption.to_string()),
        ("access_token", access_token.to_string()),
    ]
}

pub fn publish_params(creation_id: &str, access_token: &str) -> Vec<(&'static str, String)> {
    vec![
        ("creation_id", creation_id.to_string()),
        ("access_token", access_token.to_string()),
    ]
}

pub fn page_feed_params(message: &str, access_token: &str) -> Vec<(&'static str, String)> {
    vec![
        ("message", message.to_string()),
        ("access_token", access_token.to_string()),
    ]
}

#[derive(Deserialize)]
struct GraphIdResponse {
    id: String,
}
