//! Image service client.
//!
//! Pasting a picture between documents must not share the underlying
//! binary; the image service owns the binaries and exposes a duplicate
//! operation. Duplication failures never reject an edit batch - the step is
//! content, the copy is best-effort.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors from the image service.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The service could not be reached.
    #[error("image service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a non-success status.
    #[error("image service rejected the request: {0}")]
    Rejected(String),
}

/// Seam for the external image service.
#[async_trait]
pub trait ImageService: Send + Sync + 'static {
    /// Duplicate the image `source_id` under `new_id`.
    async fn duplicate(&self, source_id: &str, new_id: &str) -> Result<(), ImageError>;
}

/// Records duplications instead of performing them; for tests and
/// single-node development.
#[derive(Clone, Default)]
pub struct MemoryImageService {
    copies: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryImageService {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(source_id, new_id)` pair duplicated so far.
    #[allow(clippy::expect_used)]
    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.lock().expect("Mutex poisoned").clone()
    }
}

#[async_trait]
impl ImageService for MemoryImageService {
    #[allow(clippy::expect_used)]
    async fn duplicate(&self, source_id: &str, new_id: &str) -> Result<(), ImageError> {
        self.copies
            .lock()
            .expect("Mutex poisoned")
            .push((source_id.to_string(), new_id.to_string()));
        Ok(())
    }
}

#[derive(Serialize)]
struct DuplicateRequest<'a> {
    id: &'a str,
    #[serde(rename = "newId")]
    new_id: &'a str,
}

/// HTTP client for the image service.
#[derive(Clone)]
pub struct HttpImageService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageService {
    /// Create a client against the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl ImageService for HttpImageService {
    async fn duplicate(&self, source_id: &str, new_id: &str) -> Result<(), ImageError> {
        let url = format!("{}/images/duplicate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&DuplicateRequest { id: source_id, new_id })
            .send()
            .await
            .map_err(|e| ImageError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ImageError::Rejected(format!("status {}", response.status())));
        }

        Ok(())
    }
}
