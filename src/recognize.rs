//! Song recognition through the RapidAPI Shazam endpoint.
//!
//! Audio arrives base64-encoded from the client and is forwarded untouched.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use crate::backend::{BackendError, BackendResult};
use crate::config::RapidApiConfig;

const DETECT_URL: &str = "https://shazam.p.rapidapi.com/songs/detect";

#[async_trait]
pub trait SongRecognizer: Send + Sync {
    /// Identify a recording; returns the provider's JSON result
    async fn recognize(&self, audio_base64: &str) -> BackendResult<serde_json::Value>;
}

pub struct RapidApiRecognizer {
    config: RapidApiConfig,
    client: reqwest::Client,
}

impl RapidApiRecognizer {
    pub fn new(config: RapidApiConfig) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SongRecognizer for RapidApiRecognizer {
    async fn recognize(&self, audio_base64: &str) -> BackendResult<serde_json::Value> {
        let response = self
            .client
            .post(DETECT_URL)
            .header("content-type", "text/plain")
            .header("X-RapidAPI-Key", &self.config.key)
            .header("X-RapidAPI-Host", &self.config.host)
            .body(audio_base64.to_string())
            .send()
            .await?;

        match response.status() {
            // No match
            StatusCode::NO_CONTENT => Ok(serde_json::json!({ "matches": [] })),
            StatusCode::OK => Ok(response.json().await?),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BackendError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}
