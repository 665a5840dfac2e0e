//! Image loading by URL.
//!
//! `http://` and `https://` URLs are fetched; `file://` URLs and bare paths
//! are read from the local filesystem.

use async_trait::async_trait;
use image::DynamicImage;

use crate::comfy::ensure_success;
use crate::error::BackendError;
use crate::traits::ImageLoader;

pub struct HttpImageLoader {
    client: reqwest::Client,
}

impl HttpImageLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let response = ensure_success(self.client.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

async fn read_file(path: &str) -> Result<Vec<u8>, BackendError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| BackendError::Image(format!("{path}: {e}")))
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, url: &str) -> Result<DynamicImage, BackendError> {
        let bytes = if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch(url).await?
        } else {
            read_file(url.strip_prefix("file://").unwrap_or(url)).await?
        };
        image::load_from_memory(&bytes).map_err(|e| BackendError::Image(format!("{url}: {e}")))
    }
}
