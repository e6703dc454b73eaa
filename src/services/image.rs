use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use url::Url;

use crate::core::config::Config;
use crate::core::error::{ComicError, ComicResult};
use crate::services::llm::GeminiConfig;
use crate::utils::image::DEFAULT_IMAGE_MIME;

/// Sampling settings sent with every panel request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub candidate_count: u32,
    pub seed: Option<i64>,
}

impl GenerationParams {
    pub fn with_seed(seed: Option<i64>) -> Self {
        Self {
            temperature: 0.6,
            top_k: 32,
            top_p: 0.9,
            candidate_count: 1,
            seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestPart {
    InlineImage { mime_type: String, data: Vec<u8> },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    /// Reference images first, the rendering instruction last.
    pub parts: Vec<RequestPart>,
    pub params: GenerationParams,
    /// Reduced ratio such as `2:3`.
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    InlineImage { mime_type: String, data: Vec<u8> },
    FileRef { uri: String, mime_type: Option<String> },
    Text(String),
}

#[derive(Debug, Clone, Default)]
pub struct ImageResponse {
    pub parts: Vec<ResponsePart>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> ComicResult<ImageResponse>;

    /// Downloads an externally hosted result referenced by a response part.
    async fn fetch_file(&self, uri: &str) -> ComicResult<FetchedFile>;
}

pub fn create_image_client(config: &Config) -> Result<Box<dyn ImageClient>> {
    let cfg = config.llm.gemini.as_ref().context("Gemini config missing")?;
    Ok(Box::new(GeminiImageClient::new(
        cfg,
        Duration::from_secs(config.llm.request_timeout_seconds),
    )?))
}

// --- Gemini ---

const MAX_DOWNLOAD_REDIRECTS: usize = 5;

pub struct GeminiImageClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    /// Redirects are followed by hand so the key never leaves the API origin.
    download_client: reqwest::Client,
}

impl GeminiImageClient {
    pub fn new(cfg: &GeminiConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
            download_client: reqwest::Client::builder()
                .timeout(timeout)
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
        })
    }

    fn is_api_origin(&self, url: &Url) -> bool {
        Url::parse(&self.base_url)
            .map(|base| base.origin() == url.origin())
            .unwrap_or(false)
    }

    fn build_payload(request: &ImageRequest) -> Value {
        let parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                RequestPart::InlineImage { mime_type, data } => json!({
                    "inline_data": {
                        "mime_type": mime_type,
                        "data": BASE64.encode(data),
                    }
                }),
                RequestPart::Text(text) => json!({ "text": text }),
            })
            .collect();

        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), json!(request.params.temperature));
        generation_config.insert("topK".to_string(), json!(request.params.top_k));
        generation_config.insert("topP".to_string(), json!(request.params.top_p));
        generation_config.insert(
            "candidateCount".to_string(),
            json!(request.params.candidate_count),
        );
        generation_config.insert(
            "responseModalities".to_string(),
            json!(["TEXT", "IMAGE"]),
        );
        if let Some(seed) = request.params.seed {
            generation_config.insert("seed".to_string(), json!(seed));
        }
        if let Some(ratio) = &request.aspect_ratio {
            generation_config.insert("imageConfig".to_string(), json!({ "aspectRatio": ratio }));
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": Value::Object(generation_config),
        })
    }
}

#[derive(Deserialize)]
struct GeminiImageResponse {
    #[serde(default)]
    candidates: Vec<GeminiImageCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize)]
struct GeminiImageCandidate {
    content: Option<GeminiImageContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiImageContent {
    #[serde(default)]
    parts: Vec<Value>,
}

#[derive(Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Converts a raw `generateContent` body into typed response parts.
/// Only the first candidate is read; parts that cannot be decoded are skipped.
pub fn parse_gemini_image_response(body: &str) -> ComicResult<ImageResponse> {
    let raw: GeminiImageResponse = serde_json::from_str(body)
        .map_err(|e| ComicError::service(format!("unreadable image response: {}", e)))?;

    let block_reason = raw.prompt_feedback.and_then(|f| f.block_reason);
    let Some(candidate) = raw.candidates.into_iter().next() else {
        return Ok(ImageResponse {
            parts: Vec::new(),
            finish_reason: block_reason,
        });
    };

    let mut parts = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(inline) = part.get("inline_data").or_else(|| part.get("inlineData")) {
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let Ok(bytes) = BASE64.decode(data.as_bytes()) else {
                debug!("Skipping inline part with undecodable base64 payload");
                continue;
            };
            let mime_type = inline
                .get("mime_type")
                .or_else(|| inline.get("mimeType"))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_IMAGE_MIME)
                .to_string();
            parts.push(ResponsePart::InlineImage {
                mime_type,
                data: bytes,
            });
        } else if let Some(file) = part.get("file_data").or_else(|| part.get("fileData")) {
            let uri = file
                .get("file_uri")
                .or_else(|| file.get("fileUri"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if uri.is_empty() {
                continue;
            }
            let mime_type = file
                .get("mime_type")
                .or_else(|| file.get("mimeType"))
                .and_then(Value::as_str)
                .map(str::to_string);
            parts.push(ResponsePart::FileRef {
                uri: uri.to_string(),
                mime_type,
            });
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            parts.push(ResponsePart::Text(text.to_string()));
        }
    }

    Ok(ImageResponse {
        parts,
        finish_reason: candidate.finish_reason.or(block_reason),
    })
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else {
        format!("request failed: {}", e)
    }
}

#[async_trait]
impl ImageClient for GeminiImageClient {
    async fn generate(&self, request: &ImageRequest) -> ComicResult<ImageResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let payload = Self::build_payload(request);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ComicError::service(describe_transport_error(&e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ComicError::service(describe_transport_error(&e)))?;
        if !status.is_success() {
            return Err(ComicError::service(format!("Image gen failed: {} {}", status, body)));
        }

        parse_gemini_image_response(&body)
    }

    async fn fetch_file(&self, uri: &str) -> ComicResult<FetchedFile> {
        let mut url =
            Url::parse(uri).map_err(|e| ComicError::fetch(format!("invalid uri {}: {}", uri, e)))?;

        let mut hops = 0;
        let resp = loop {
            let mut req = self.download_client.get(url.clone());
            if self.is_api_origin(&url) {
                req = req.header("x-goog-api-key", &self.api_key);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| ComicError::fetch(describe_transport_error(&e)))?;

            if !resp.status().is_redirection() {
                break resp;
            }
            hops += 1;
            if hops > MAX_DOWNLOAD_REDIRECTS {
                return Err(ComicError::fetch(format!("{} redirected too many times", uri)));
            }
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ComicError::fetch(format!("{} redirected without a location", url)))?;
            url = url
                .join(location)
                .map_err(|e| ComicError::fetch(format!("bad redirect from {}: {}", url, e)))?;
            debug!("Following download redirect to {}", url);
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(ComicError::fetch(format!("{} returned {}", uri, status)));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ComicError::fetch(describe_transport_error(&e)))?;

        Ok(FetchedFile {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
