//! OpenAI images API client.
//!
//! The protocol loop only ever talks to the [`ImageBackend`] trait; the
//! concrete [`OpenAiClient`] does the two network calls (generate, then
//! download) with fixed timeouts and no retries. Tests substitute a fake
//! backend and never touch the network.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Endpoint for DALL-E image generation.
const GENERATIONS_URL: &str = "https://api.openai.com/v1/images/generations";

/// Model used for all generations.
const MODEL: &str = "dall-e-3";

/// Timeout for the generation call.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for downloading the finished image.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// The image generation collaborator as seen by the protocol loop.
///
/// Two operations: produce an image reference (URL) for a prompt, and save
/// a referenced image to a local path.
pub trait ImageBackend {
    /// Generates an image and returns its URL.
    fn generate(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
    ) -> impl Future<Output = Result<String, BackendError>>;

    /// Downloads a generated image to `dest`.
    fn download(
        &self,
        url: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<(), BackendError>>;
}

/// Request body for the images API.
#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'static str,
    prompt: &'a str,
    n: u32,
    size: &'static str,
}

/// Response body from the images API.
#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: String,
}

/// Maps requested dimensions onto one of the supported DALL-E sizes.
///
/// Large requests get the HD aspect ratio, everything else the square
/// default.
#[must_use]
pub const fn select_size(width: u32, height: u32) -> &'static str {
    if width >= 1920 || height >= 1080 {
        "1792x1024"
    } else {
        "1024x1024"
    }
}

/// HTTP client for the OpenAI images API.
///
/// `OPENAI_API_KEY` is read from the environment on every generation call,
/// not at construction, so the server can start (and answer `tools/list`)
/// without a credential and pick one up set after launch.
pub struct OpenAiClient {
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Creates a client. No credential is required until a generation is
    /// attempted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBackend for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
    ) -> Result<String, BackendError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(BackendError::MissingApiKey)?;

        let size = select_size(width, height);
        tracing::debug!(%size, width, height, "Requesting image generation");

        let request = ImageRequest {
            model: MODEL,
            prompt,
            n: 1,
            size,
        };

        let response = self
            .client
            .post(GENERATIONS_URL)
            .bearer_auth(api_key)
            .json(&request)
            .timeout(GENERATE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "Image generation API error");
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ImageResponse = response.json().await?;
        let url = parsed
            .data
            .into_iter()
            .map(|d| d.url)
            .find(|u| !u.is_empty())
            .ok_or(BackendError::EmptyResponse)?;

        tracing::debug!("Received image URL from API");
        Ok(url)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), BackendError> {
        tracing::debug!(dest = %dest.display(), "Downloading generated image");

        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                body: "image download failed".to_string(),
            });
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| BackendError::Write {
                path: PathBuf::from(dest),
                source: e,
            })?;

        tracing::debug!(bytes = bytes.len(), "Image written to disk");
        Ok(())
    }
}
