//! Lead image download

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{PlatformError, Result};

/// Largest blob the posting target accepts for an image
pub const MAX_IMAGE_BYTES: usize = 1_000_000;

/// Fetches binary media by URL
///
/// Returns `None` for anything other than a complete 200 response. Failures
/// are never fatal: the caller posts without the image.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>>;
}

/// HTTP media fetcher backed by reqwest
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("skycast/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_bytes: MAX_IMAGE_BYTES,
        }
    }

    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Image download failed for {}: {}", url, e);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            tracing::warn!("Image download for {} returned {}", url, response.status());
            return None;
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Image body read failed for {}: {}", url, e);
                return None;
            }
        };

        if bytes.len() > self.max_bytes {
            tracing::warn!(
                "Image {} is {} bytes, over the {} byte limit; posting without it",
                url,
                bytes.len(),
                self.max_bytes
            );
            return None;
        }

        tracing::debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Some(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpMediaFetcher {
        HttpMediaFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]))
            .mount(&server)
            .await;

        let bytes = fetcher()
            .fetch(&format!("{}/img/a.png", server.uri()))
            .await
            .expect("image bytes");
        assert_eq!(bytes, vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(fetcher()
            .fetch(&format!("{}/img/missing.png", server.uri()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_fetch_non_200_success_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert!(fetcher()
            .fetch(&format!("{}/img/empty.png", server.uri()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_fetch_oversized_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let small = fetcher().max_bytes(16);
        assert!(small
            .fetch(&format!("{}/img/big.gif", server.uri()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_is_none() {
        assert!(fetcher().fetch("http://127.0.0.1:1/a.png").await.is_none());
    }
}
