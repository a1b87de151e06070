use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::Config;
use crate::llm::media::detect_mime_type;
use crate::llm::types::{FailureKind, GeneratedImage, GenerationError, ImageGenerator, ImageRequest};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_provider_timing;

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    revised_prompt: Option<String>,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|message| message.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// DALL·E image generation through the OpenAI images endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiImageClient {
    api_key: String,
    base_url: String,
    model: String,
    size: String,
    quality: String,
    style: String,
    request_timeout: Duration,
}

impl OpenAiImageClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.openai_api_key.trim().to_string(),
            base_url: config.openai_base_url.clone(),
            model: config.openai_image_model.clone(),
            size: config.image_size.clone(),
            quality: config.image_quality.clone(),
            style: config.image_style.clone(),
            request_timeout: config.attempt_timeout(),
        }
    }

    fn payload(&self, request: &ImageRequest) -> Value {
        json!({
            "model": self.model,
            "prompt": request.prompt,
            "size": self.size,
            "quality": self.quality,
            "style": self.style,
            "n": 1,
            "response_format": "b64_json",
        })
    }

    fn redact(&self, text: &str) -> String {
        if self.api_key.is_empty() {
            return text.to_string();
        }
        text.replace(&self.api_key, "[redacted]")
    }

    async fn request_image(&self, request: &ImageRequest) -> Result<GeneratedImage, GenerationError> {
        if self.api_key.is_empty() {
            return Err(GenerationError::new(
                FailureKind::Auth,
                "OPENAI_API_KEY is not configured",
            ));
        }

        let response = get_http_client()
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|err| {
                let err_text = self.redact(&err.to_string());
                warn!("OpenAI image request failed to send: {}", err_text);
                GenerationError::from_reqwest(&err, format!("OpenAI request failed: {}", err_text))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = self.redact(&error_message(&body));
            warn!("OpenAI image API error: status={}, message={}", status, detail);
            return Err(GenerationError::from_status(status, &detail));
        }

        let parsed = response.json::<ImagesResponse>().await.map_err(|err| {
            GenerationError::from_reqwest(&err, format!("OpenAI response could not be decoded: {}", err))
        })?;
        decode_first_image(parsed)
    }
}

fn decode_first_image(response: ImagesResponse) -> Result<GeneratedImage, GenerationError> {
    let datum = response.data.into_iter().next().ok_or_else(|| {
        GenerationError::new(FailureKind::InvalidResponse, "OpenAI returned no image data")
    })?;
    if let Some(revised) = datum.revised_prompt.as_deref() {
        tracing::debug!("OpenAI revised prompt: {}", revised);
    }
    let encoded = datum.b64_json.ok_or_else(|| {
        GenerationError::new(FailureKind::InvalidResponse, "OpenAI image missing b64_json")
    })?;
    let bytes = general_purpose::STANDARD.decode(encoded.trim()).map_err(|err| {
        GenerationError::new(
            FailureKind::InvalidResponse,
            format!("OpenAI image was not valid base64: {}", err),
        )
    })?;
    let mime_type = detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string());
    Ok(GeneratedImage { bytes, mime_type })
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, GenerationError> {
        let metadata = json!({
            "creative_id": request.creative_id,
            "size": self.size,
            "quality": self.quality,
        });
        log_provider_timing("openai", &self.model, "generate_image", Some(metadata), || {
            self.request_image(request)
        })
        .await
    }
}
