use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cogworks_core::{CogError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::{error_for_status, transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Single attempt returning the encoded image.
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

enum ImagePayload {
    Inline(Vec<u8>),
    Remote(String),
}

fn decode_payload(response: GenerationResponse) -> Result<ImagePayload> {
    let image = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| CogError::Transport("No image in response".into()))?;
    if let Some(encoded) = image.b64_json {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CogError::Transport(format!("Bad image payload: {e}")))?;
        return Ok(ImagePayload::Inline(bytes));
    }
    image
        .url
        .map(ImagePayload::Remote)
        .ok_or_else(|| CogError::Transport("Image has neither data nor url".into()))
}

/// `POST {base}/images/generations`. Accepts inline base64 or a URL, which
/// is then downloaded.
pub struct OpenAiImageProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    size: String,
}

impl OpenAiImageProvider {
    pub fn new(client: Client, base_url: String, api_key: String, model: String, size: String) -> Self {
        Self { client, base_url, api_key, model, size }
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let body = GenerationRequest {
            model: &self.model,
            prompt: &request.prompt,
            n: 1,
            size: &self.size,
            response_format: "b64_json",
        };
        let resp = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let data: GenerationResponse = error_for_status(resp).await?.json().await.map_err(transport)?;

        match decode_payload(data)? {
            ImagePayload::Inline(bytes) => Ok(bytes),
            ImagePayload::Remote(url) => {
                debug!(%url, "Downloading generated image");
                let resp = self.client.get(&url).send().await.map_err(transport)?;
                let bytes = error_for_status(resp).await?.bytes().await.map_err(transport)?;
                Ok(bytes.to_vec())
            }
        }
    }
}
