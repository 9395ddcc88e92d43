//! Photo storage collaborator.
//!
//! Transport-hosted photo URLs are short-lived, so the raw bytes are
//! downloaded and re-uploaded multipart to the backend, which answers with
//! a durable public URL.

use async_trait::async_trait;
use qalabot_core::{config::BackendConfig, error::QalaError, traits::PhotoStorage};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Photo storage backed by the backend's upload endpoint.
pub struct HttpPhotoStorage {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

impl HttpPhotoStorage {
    pub fn new(config: &BackendConfig) -> Result<Self, QalaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QalaError::Storage(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl PhotoStorage for HttpPhotoStorage {
    async fn store(&self, source_url: &str) -> Result<String, QalaError> {
        debug!("photos: fetching {source_url}");
        let bytes = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| QalaError::Storage(format!("photo download failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| QalaError::Storage(format!("photo read failed: {e}")))?;

        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name("photo.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| QalaError::Storage(format!("mime error: {e}")))?;
        let form = reqwest::multipart::Form::new().part("photo", part);

        let url = format!("{}/api/photos", self.base_url);
        let mut req = self.client.post(&url).multipart(form);
        if !self.api_token.is_empty() {
            req = req.bearer_auth(&self.api_token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| QalaError::Storage(format!("photo upload failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QalaError::Storage(format!(
                "photo upload returned {status}: {body}"
            )));
        }

        let uploaded: UploadResponse = resp
            .json()
            .await
            .map_err(|e| QalaError::Storage(format!("photo upload parse failed: {e}")))?;

        Ok(uploaded.url)
    }
}
