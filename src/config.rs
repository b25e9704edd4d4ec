//! Configuration types for document-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The web server keeps one default
//! config and clones it per request, overriding only the session's API key,
//! so every knob lives in this one struct.
//!
//! HTTP-layer settings (bind address, session lifetime) are
//! kept apart in [`ServerConfig`].

use crate::error::Doc2MdError;
use crate::pipeline::caption::ImageCaptioner;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default per-file upload limit: 200 MB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;

/// Default vision model, used for both the direct client and named providers.
pub const DEFAULT_CAPTION_MODEL: &str = "gpt-4o";

/// Default OpenAI-compatible API root for session keys.
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for a conversion batch.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_doc2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .max_file_size(50 * 1024 * 1024)
///     .api_key("sk-test")
///     .model("gpt-4o-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Largest accepted upload in bytes. Default: 200 MB.
    ///
    /// Also applied to every member of an archive after decompression.
    pub max_file_size: u64,

    /// How deep nested archives are expanded. Default: 3.
    ///
    /// The top-level upload is depth 1; a ZIP inside it is depth 2.
    pub max_archive_depth: usize,

    /// Members read from one archive before the rest are skipped. Default: 1000.
    pub max_archive_members: usize,

    /// API key for the OpenAI-compatible vision endpoint (session key).
    ///
    /// When set, captioning goes through the direct HTTP client at
    /// `api_base_url`, bypassing provider auto-detection.
    pub api_key: Option<String>,

    /// Root URL of the OpenAI-compatible API used with `api_key`.
    pub api_base_url: String,

    /// Vision model identifier. If None, uses [`DEFAULT_CAPTION_MODEL`].
    pub model: Option<String>,

    /// edgequake-llm provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed captioner. Takes precedence over everything else.
    pub captioner: Option<Arc<dyn ImageCaptioner>>,

    /// Look for `OPENAI_API_KEY` / `EDGEQUAKE_LLM_PROVIDER` when no key or
    /// provider is configured explicitly. Default: true.
    pub caption_from_env: bool,

    /// Sampling temperature for captions. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per image. Default: 1024.
    ///
    /// Transcribed scanned pages need more room than captions, so they are
    /// given four times this budget.
    pub max_tokens: usize,

    /// Per-request timeout for the vision API in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom caption prompt. If None, uses the built-in default.
    pub caption_prompt: Option<String>,

    /// Rasterise PDF pages without a text layer and transcribe them with the
    /// captioner. Ignored when captioning is unavailable. Default: true.
    pub transcribe_scanned_pages: bool,

    /// Longest edge in pixels of a rasterised PDF page. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Separator between files in the combined download. Default: heading.
    pub file_separator: FileSeparator,

    /// Receives per-file progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_archive_depth: 3,
            max_archive_members: 1000,
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: None,
            provider_name: None,
            captioner: None,
            caption_from_env: true,
            temperature: 0.1,
            max_tokens: 1024,
            api_timeout_secs: 60,
            caption_prompt: None,
            transcribe_scanned_pages: true,
            max_rendered_pixels: 2000,
            file_separator: FileSeparator::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_file_size", &self.max_file_size)
            .field("max_archive_depth", &self.max_archive_depth)
            .field("max_archive_members", &self.max_archive_members)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("captioner", &self.captioner.as_ref().map(|c| c.name().to_string()))
            .field("caption_from_env", &self.caption_from_env)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("transcribe_scanned_pages", &self.transcribe_scanned_pages)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("file_separator", &self.file_separator)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model to request, falling back to the default.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_CAPTION_MODEL)
    }

    /// A copy of this config carrying a session API key.
    ///
    /// A blank key clears any key already set.
    pub fn with_api_key(&self, key: Option<&str>) -> Self {
        let mut config = self.clone();
        config.api_key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        config
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn max_archive_depth(mut self, depth: usize) -> Self {
        self.config.max_archive_depth = depth;
        self
    }

    pub fn max_archive_members(mut self, n: usize) -> Self {
        self.config.max_archive_members = n;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn captioner(mut self, captioner: Arc<dyn ImageCaptioner>) -> Self {
        self.config.captioner = Some(captioner);
        self
    }

    pub fn caption_from_env(mut self, v: bool) -> Self {
        self.config.caption_from_env = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn caption_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.caption_prompt = Some(prompt.into());
        self
    }

    pub fn transcribe_scanned_pages(mut self, v: bool) -> Self {
        self.config.transcribe_scanned_pages = v;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn file_separator(mut self, sep: FileSeparator) -> Self {
        self.config.file_separator = sep;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Doc2MdError> {
        let c = &self.config;
        if c.max_file_size == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "max_file_size must be > 0".into(),
            ));
        }
        if c.max_archive_depth == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "max_archive_depth must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(Doc2MdError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if !(c.api_base_url.starts_with("http://") || c.api_base_url.starts_with("https://")) {
            return Err(Doc2MdError::InvalidConfig(format!(
                "api_base_url must be an HTTP(S) URL, got '{}'",
                c.api_base_url
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How files are separated in the combined Markdown download.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileSeparator {
    /// Plain concatenation of the per-file outputs.
    None,
    /// `## <source name>` before each file. (default)
    #[default]
    Heading,
    /// Horizontal rule between files.
    HorizontalRule,
    /// Custom string on its own line between files.
    Custom(String),
}

impl FileSeparator {
    /// Text inserted before the file at `position` (0-based among the files
    /// that make it into the combined document).
    pub fn render(&self, position: usize, source_name: &str) -> String {
        match self {
            FileSeparator::None => String::new(),
            FileSeparator::Heading => {
                let lead = if position == 0 { "" } else { "\n" };
                format!("{lead}## {source_name}\n\n")
            }
            FileSeparator::HorizontalRule if position > 0 => "\n---\n\n".to_string(),
            FileSeparator::Custom(s) if position > 0 => format!("\n{s}\n\n"),
            _ => String::new(),
        }
    }

    /// Parse the CLI form: `none`, `heading`, `hr`/`---`, anything else is custom.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => FileSeparator::None,
            "heading" | "headings" => FileSeparator::Heading,
            "hr" | "---" => FileSeparator::HorizontalRule,
            _ => FileSeparator::Custom(s.trim().to_string()),
        }
    }
}

/// Settings for the HTTP layer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind. Default: 127.0.0.1.
    pub host: String,
    /// Port to bind. Default: 8501.
    pub port: u16,
    /// Idle sessions older than this are evicted. Default: 3600 s.
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            session_ttl_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
