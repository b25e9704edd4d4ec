//! Image captioning: the vision-model seam.
//!
//! [`ImageCaptioner`] is the one trait the conversion engine needs from an
//! AI backend: given an image, return text. Two implementations ship:
//!
//! * [`LlmCaptioner`] wraps any `edgequake-llm` provider. Used when the
//!   provider is configured from the environment (`OPENAI_API_KEY`,
//!   `EDGEQUAKE_LLM_PROVIDER` …) or named explicitly.
//! * [`OpenAiCaptioner`] talks to an OpenAI-compatible `/chat/completions`
//!   endpoint directly with a caller-supplied key. This is what a web session
//!   uses when the user pastes their own API key into the UI.
//!
//! Neither retries. A failed caption is a [`CaptionError`], which the
//! dispatcher turns into a placeholder and a warning.

use crate::config::ConversionConfig;
use crate::error::CaptionError;
use crate::pipeline::encode::{encode_image, EncodedImage};
use crate::prompts::{prompt_for, SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What the image is being sent for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionPurpose {
    /// Describe a picture (embedded image or uploaded image file).
    Caption,
    /// Transcribe a scanned PDF page to Markdown.
    TranscribePage,
}

/// One image to describe.
#[derive(Debug, Clone, Copy)]
pub struct CaptionRequest<'a> {
    pub purpose: CaptionPurpose,
    pub image: &'a EncodedImage,
    /// Human-readable name of the image, used in logs and warnings.
    pub label: &'a str,
}

/// A backend that turns images into text.
///
/// Implementations must be `Send + Sync`; one captioner is shared by every
/// file of a batch.
#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    /// Short name for logs (`"openai-direct"`, `"llm:openai"` …).
    fn name(&self) -> &str;

    /// Describe one image. Never retried by the caller.
    async fn describe(&self, request: &CaptionRequest<'_>) -> Result<String, CaptionError>;
}

/// Encode raw image bytes and send them to `captioner`.
pub async fn describe_bytes(
    captioner: &dyn ImageCaptioner,
    purpose: CaptionPurpose,
    bytes: &[u8],
    label: &str,
) -> Result<String, CaptionError> {
    let image = encode_image(bytes)?;
    let start = Instant::now();
    let text = captioner
        .describe(&CaptionRequest {
            purpose,
            image: &image,
            label,
        })
        .await?;
    debug!(
        "{}: {} chars from {} in {:?}",
        label,
        text.len(),
        captioner.name(),
        start.elapsed()
    );
    if text.trim().is_empty() {
        return Err(CaptionError::InvalidResponse("empty description".into()));
    }
    Ok(text)
}

/// Model parameters shared by both captioners.
#[derive(Debug, Clone)]
pub struct CaptionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout: Duration,
    pub caption_prompt: Option<String>,
}

impl CaptionSettings {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            model: config.model_or_default().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
            caption_prompt: config.caption_prompt.clone(),
        }
    }

    fn prompt(&self, purpose: CaptionPurpose) -> &str {
        prompt_for(purpose, self.caption_prompt.as_deref())
    }

    /// A transcribed page needs far more output than a caption.
    fn max_tokens_for(&self, purpose: CaptionPurpose) -> usize {
        match purpose {
            CaptionPurpose::Caption => self.max_tokens,
            CaptionPurpose::TranscribePage => self.max_tokens * 4,
        }
    }
}

// ── edgequake-llm provider ───────────────────────────────────────────────

/// Captioner backed by an `edgequake-llm` provider.
pub struct LlmCaptioner {
    provider: Arc<dyn LLMProvider>,
    settings: CaptionSettings,
    name: String,
}

impl LlmCaptioner {
    pub fn new(provider: Arc<dyn LLMProvider>, provider_name: &str, settings: CaptionSettings) -> Self {
        Self {
            provider,
            settings,
            name: format!("llm:{provider_name}"),
        }
    }
}

#[async_trait]
impl ImageCaptioner for LlmCaptioner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn describe(&self, request: &CaptionRequest<'_>) -> Result<String, CaptionError> {
        let image = ImageData::new(request.image.base64.clone(), request.image.mime_type)
            .with_detail("high");
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_with_images(self.settings.prompt(request.purpose), vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens_for(request.purpose)),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&options));
        match tokio::time::timeout(self.settings.timeout, call).await {
            Err(_) => Err(CaptionError::Timeout {
                secs: self.settings.timeout.as_secs(),
            }),
            Ok(Err(e)) => {
                let err = classify_provider_error(&e.to_string());
                warn!("{}: {} failed: {}", request.label, self.name, err);
                Err(err)
            }
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    request.label, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
        }
    }
}

/// Map a provider error message onto a [`CaptionError`] category.
///
/// Providers surface HTTP failures as text, so the status is recovered from
/// the message.
pub(crate) fn classify_provider_error(msg: &str) -> CaptionError {
    let lower = msg.to_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("incorrect api key")
        || lower.contains("authentication")
    {
        CaptionError::Auth {
            detail: msg.to_string(),
        }
    } else if lower.contains("429") || lower.contains("rate limit") {
        CaptionError::RateLimited {
            retry_after_secs: None,
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        CaptionError::Timeout { secs: 0 }
    } else {
        CaptionError::Http(msg.to_string())
    }
}

// ── Direct OpenAI-compatible client ──────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Captioner that calls an OpenAI-compatible chat endpoint with its own key.
pub struct OpenAiCaptioner {
    client: Client,
    api_key: String,
    endpoint: String,
    settings: CaptionSettings,
}

impl std::fmt::Debug for OpenAiCaptioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCaptioner")
            .field("endpoint", &self.endpoint)
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiCaptioner {
    /// Build a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        settings: CaptionSettings,
    ) -> Result<Self, CaptionError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| CaptionError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            settings,
        })
    }
}

#[async_trait]
impl ImageCaptioner for OpenAiCaptioner {
    fn name(&self) -> &str {
        "openai-direct"
    }

    async fn describe(&self, request: &CaptionRequest<'_>) -> Result<String, CaptionError> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                Message {
                    role: "system",
                    content: vec![Content::Text { text: SYSTEM_PROMPT }],
                },
                Message {
                    role: "user",
                    content: vec![
                        Content::Text {
                            text: self.settings.prompt(request.purpose),
                        },
                        Content::ImageUrl {
                            image_url: ImageUrl {
                                url: request.image.data_uri(),
                                detail: "high",
                            },
                        },
                    ],
                },
            ],
            max_tokens: self.settings.max_tokens_for(request.purpose),
            temperature: self.settings.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            let err = status_error(status, &text, retry_after);
            warn!("{}: caption request failed: {}", request.label, err);
            return Err(err);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CaptionError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "{}: {} input tokens, {} output tokens",
                request.label, usage.prompt_tokens, usage.completion_tokens
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CaptionError::InvalidResponse("no choices in response".into()))
    }
}

impl OpenAiCaptioner {
    fn transport_error(&self, e: reqwest::Error) -> CaptionError {
        if e.is_timeout() {
            CaptionError::Timeout {
                secs: self.settings.timeout.as_secs(),
            }
        } else {
            CaptionError::Http(e.to_string())
        }
    }
}

/// Map a non-success HTTP status to a [`CaptionError`].
fn status_error(status: StatusCode, body: &str, retry_after_secs: Option<u64>) -> CaptionError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CaptionError::Auth {
            detail: format!("HTTP {}: {}", status.as_u16(), detail),
        },
        StatusCode::TOO_MANY_REQUESTS => CaptionError::RateLimited { retry_after_secs },
        _ => CaptionError::Api {
            status: status.as_u16(),
            detail,
        },
    }
}
