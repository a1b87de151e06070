use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::types::{
    FailureKind, GeneratedImage, GenerationError, ImageGenerator, ImageRequest, TextGenerator,
    TextRequest,
};
use crate::llm::media::detect_mime_type;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_provider_timing;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const IMAGE_SYSTEM_INSTRUCTION: &str =
    "Generate an image based on the prompt. CRITICAL: response be an image, NOT TEXT.";

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "permissive" => "OFF",
        _ => "BLOCK_MEDIUM_AND_ABOVE",
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

fn build_image_config(aspect_ratio: &str) -> Option<Value> {
    let trimmed = aspect_ratio.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut map = Map::new();
    map.insert("aspectRatio".to_string(), json!(trimmed));
    Some(Value::Object(map))
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[]);
        for part in parts {
            match part {
                GeminiPart::Text { text } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::InlineData { inline_data } => {
                    if inline_data.mime_type.starts_with("image/") {
                        image_parts += 1;
                    }
                }
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        let parts = candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            if let GeminiPart::Text { text } = part {
                if !text.trim().is_empty() {
                    text_parts.push(text);
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_images_from_response(response: GeminiResponse) -> Vec<Vec<u8>> {
    let mut images = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        let parts = candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            if let GeminiPart::InlineData { inline_data } = part {
                if inline_data.mime_type.starts_with("image/") {
                    if let Ok(bytes) = general_purpose::STANDARD.decode(inline_data.data) {
                        images.push(bytes);
                    }
                }
            }
        }
    }
    images
}

/// Gemini REST client for captions, audience analysis and images. Each call
/// is a single attempt; retries belong to the caller's policy.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
    temperature: f32,
    top_k: i32,
    top_p: f32,
    max_output_tokens: i32,
    safety_profile: String,
    request_timeout: Duration,
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.trim().to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            text_model: config.gemini_model.clone(),
            image_model: config.gemini_image_model.clone(),
            temperature: config.gemini_temperature,
            top_k: config.gemini_top_k,
            top_p: config.gemini_top_p,
            max_output_tokens: config.gemini_max_output_tokens,
            safety_profile: config.gemini_safety_settings.clone(),
            request_timeout: config.attempt_timeout(),
        }
    }

    fn redact(&self, text: &str) -> String {
        if self.api_key.is_empty() {
            return text.to_string();
        }
        text.replace(&self.api_key, "[redacted]")
    }

    async fn call_api(&self, model: &str, payload: Value) -> Result<GeminiResponse, GenerationError> {
        if self.api_key.is_empty() {
            return Err(GenerationError::new(
                FailureKind::Auth,
                "GEMINI_API_KEY is not configured",
            ));
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = get_http_client()
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = self.redact(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect()
                );
                GenerationError::from_reqwest(&err, format!("Gemini request failed: {}", err_text))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Gemini API error: status={}, body={}", status, self.redact(&body_summary));
            let detail = self.redact(&message.unwrap_or(body_summary));
            return Err(GenerationError::from_status(status, &detail));
        }

        let value = response.json::<GeminiResponse>().await.map_err(|err| {
            GenerationError::from_reqwest(
                &err,
                format!("Gemini response could not be decoded: {}", self.redact(&err.to_string())),
            )
        })?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "llm.gemini", model = model, response = %response_summary);
        }
        Ok(value)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "topK": self.top_k,
                "topP": self.top_p,
                "maxOutputTokens": self.max_output_tokens,
            },
            "safetySettings": build_safety_settings(&self.safety_profile),
        });
        let metadata = json!({ "creative_id": request.creative_id });

        log_provider_timing("gemini", &self.text_model, "generate_text", Some(metadata), || async {
            let response = self.call_api(&self.text_model, payload).await?;
            let text = extract_text_from_response(response);
            if text.trim().is_empty() {
                return Err(GenerationError::new(
                    FailureKind::InvalidResponse,
                    "Gemini returned no text",
                ));
            }
            Ok(text)
        })
        .await
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, GenerationError> {
        let mut generation_config = json!({
            "responseModalities": ["TEXT", "IMAGE"]
        });
        if let Some(image_config) = build_image_config(&request.style.aspect_ratio) {
            if let Some(config_object) = generation_config.as_object_mut() {
                config_object.insert("imageConfig".to_string(), image_config);
            }
        }

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": IMAGE_SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": generation_config,
            "safetySettings": build_safety_settings(&self.safety_profile),
        });
        let metadata = json!({
            "creative_id": request.creative_id,
            "palette": request.style.palette,
        });

        log_provider_timing("gemini", &self.image_model, "generate_image", Some(metadata), || async {
            let response = self.call_api(&self.image_model, payload).await?;
            let bytes = extract_images_from_response(response)
                .into_iter()
                .next()
                .ok_or_else(|| {
                    GenerationError::new(
                        FailureKind::InvalidResponse,
                        format!("No images returned by Gemini (model: {})", self.image_model),
                    )
                })?;
            let mime_type = detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string());
            Ok(GeneratedImage { bytes, mime_type })
        })
        .await
    }
}
