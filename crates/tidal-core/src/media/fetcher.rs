//! Asset fetching for the media cache.

use std::future::Future;
use std::time::Duration;

use crate::util::{compact_text, is_http_url};
use crate::{Error, Result};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Bytes and content type of a downloaded asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Source of remote binary assets.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedAsset>> + Send;
}

/// Fetches assets with a plain `GET`.
#[derive(Debug, Clone)]
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Transport(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self { client })
    }
}

impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        if !is_http_url(url) {
            return Err(Error::InvalidInput(format!(
                "Asset URL must include http:// or https://: {url}"
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| Error::Transport(format!("Download request failed: {error}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "Download request failed with HTTP {status}: {}",
                compact_text(&body)
            )));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(FALLBACK_MIME_TYPE)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| Error::Transport(format!("Failed to read asset bytes: {error}")))?;

        Ok(FetchedAsset {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

/// File extension for a cached asset, from its MIME type or else its URL.
pub(crate) fn extension_for(url: &str, mime_type: &str) -> String {
    let known = match mime_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "audio/mpeg" => Some("mp3"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "video/mp4" => Some("mp4"),
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        _ => None,
    };
    if let Some(extension) = known {
        return extension.to_string();
    }

    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .filter(|extension| {
            !extension.is_empty()
                && extension.len() <= 5
                && extension.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}
