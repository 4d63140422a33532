#![allow(dead_code)]

//! Recording fakes for the external collaborators, shared by the
//! integration tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use meta_publisher::filehost::{FileHostService, HostedFile};
use meta_publisher::graph::GraphService;
use meta_publisher::storage::StorageService;

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Graph API fake: records every call, hands out sequential container ids,
/// and pops queued responses for publish calls.
#[derive(Clone, Default)]
pub struct RecordingGraph {
    /// (ig_user_id, image_url, caption, is_carousel_item)
    pub image_calls: Arc<Mutex<Vec<(String, String, String, bool)>>>,
    /// (ig_user_id, children, caption)
    pub carousel_calls: Arc<Mutex<Vec<(String, Vec<String>, String)>>>,
    /// (ig_user_id, creation_id)
    pub publish_calls: Arc<Mutex<Vec<(String, String)>>>,
    /// (page_id, message)
    pub page_calls: Arc<Mutex<Vec<(String, String)>>>,
    pub image_responses: Arc<Mutex<VecDeque<Result<String>>>>,
    pub publish_responses: Arc<Mutex<VecDeque<Result<String>>>>,
    pub page_responses: Arc<Mutex<VecDeque<Result<String>>>>,
    counter: Arc<Mutex<u64>>,
}

impl RecordingGraph {
    async fn next_id(&self, prefix: &str) -> String {
        let mut guard = self.counter.lock().await;
        *guard += 1;
        format!("{}{}", prefix, guard)
    }

    pub async fn queue_image_response(&self, response: Result<String>) {
        self.image_responses.lock().await.push_back(response);
    }

    pub async fn queue_publish_response(&self, response: Result<String>) {
        self.publish_responses.lock().await.push_back(response);
    }

    pub async fn queue_page_response(&self, response: Result<String>) {
        self.page_responses.lock().await.push_back(response);
    }

    pub async fn image_calls(&self) -> Vec<(String, String, String, bool)> {
        self.image_calls.lock().await.clone()
    }

    pub async fn carousel_calls(&self) -> Vec<(String, Vec<String>, String)> {
        self.carousel_calls.lock().await.clone()
    }

    pub async fn publish_calls(&self) -> Vec<(String, String)> {
        self.publish_calls.lock().await.clone()
    }

    pub async fn page_calls(&self) -> Vec<(String, String)> {
        self.page_calls.lock().await.clone()
    }
}

#[async_trait]
impl GraphService for RecordingGraph {
    async fn create_image_container(
        &self,
        ig_user_id: &str,
        _access_token: &str,
        image_url: &str,
        caption: &str,
        is_carousel_item: bool,
    ) -> Result<String> {
        self.image_calls.lock().await.push((
            ig_user_id.to_string(),
            image_url.to_string(),
            caption.to_string(),
            is_carousel_item,
        ));
        if let Some(response) = self.image_responses.lock().await.pop_front() {
            return response;
        }
        Ok(self.next_id("c").await)
    }

    async fn create_carousel_container(
        &self,
        ig_user_id: &str,
        _access_token: &str,
        children: &[String],
        caption: &str,
    ) -> Result<String> {
        self.carousel_calls.lock().await.push((
            ig_user_id.to_string(),
            children.to_vec(),
            caption.to_string(),
        ));
        Ok(self.next_id("car").await)
    }

    async fn publish_media(
        &self,
        ig_user_id: &str,
        _access_token: &str,
        creation_id: &str,
    ) -> Result<String> {
        self.publish_calls
            .lock()
            .await
            .push((ig_user_id.to_string(), creation_id.to_string()));
        if let Some(response) = self.publish_responses.lock().await.pop_front() {
            return response;
        }
        Ok(self.next_id("media-").await)
    }

    async fn publish_page_feed(
        &self,
        page_id: &str,
        _access_token: &str,
        message: &str,
    ) -> Result<String> {
        self.page_calls
            .lock()
            .await
            .push((page_id.to_string(), message.to_string()));
        if let Some(response) = self.page_responses.lock().await.pop_front() {
            return response;
        }
        Ok(self.next_id("post-").await)
    }
}

/// File host fake backed by an in-memory file map.
#[derive(Clone, Default)]
pub struct StubFileHost {
    pub files: Arc<Mutex<HashMap<String, (Bytes, String)>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl StubFileHost {
    pub async fn insert(&self, file_id: &str, content: &[u8], content_type: &str) {
        self.files.lock().await.insert(
            file_id.to_string(),
            (Bytes::copy_from_slice(content), content_type.to_string()),
        );
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl FileHostService for StubFileHost {
    async fn download(&self, file_id: &str) -> Result<HostedFile> {
        self.calls.lock().await.push(file_id.to_string());
        let guard = self.files.lock().await;
        let (content, content_type) = guard
            .get(file_id)
            .ok_or_else(|| anyhow!("file host error 404: {} not found", file_id))?;
        Ok(HostedFile {
            content: content.clone(),
            content_type: content_type.clone(),
        })
    }
}

/// Object storage fake recording uploads and serving deterministic URLs.
#[derive(Clone, Default)]
pub struct RecordingStorage {
    /// (path, content_type)
    pub uploads: Arc<Mutex<Vec<(String, String)>>>,
    pub fail_uploads: Arc<std::sync::atomic::AtomicBool>,
}

impl RecordingStorage {
    pub async fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().await.clone()
    }

    pub fn fail_next_uploads(&self) {
        self.fail_uploads
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageService for RecordingStorage {
    async fn upload(&self, path: &str, _content: Bytes, content_type: &str) -> Result<()> {
        if self.fail_uploads.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow!("storage upload error 500: bucket unavailable"));
        }
        self.uploads
            .lock()
            .await
            .push((path.to_string(), content_type.to_string()));
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("https://store.example.com/{}", path)
    }
}
