//! Configuration types for batch OCR.
//!
//! All behaviour is controlled through [`OcrConfig`], built via its
//! [`OcrConfigBuilder`]. Keeping every knob in one struct makes it trivial to
//! share a config across concurrent tasks and to log exactly what a run used.

use crate::error::OcrError;
use crate::pipeline::llm::VisionBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Endpoint used when neither the config nor `OLLAMA_HOST` names one.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Vision model requested when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "llama3.2-vision:11b";

/// Configuration for single-item and batch OCR.
///
/// Built via [`OcrConfig::builder()`] or using [`OcrConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_ocr::{OcrConfig, OutputFormat};
///
/// let config = OcrConfig::builder()
///     .model("llava:7b")
///     .concurrency(2)
///     .format(OutputFormat::Json)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    /// Base URL of the inference server, e.g. `http://localhost:11434`.
    /// If None, `OLLAMA_HOST` is consulted, then [`DEFAULT_ENDPOINT`].
    pub endpoint: Option<String>,

    /// Model identifier sent with every request. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Maximum number of items in flight at once. Default: 1 (sequential).
    ///
    /// A single local model instance usually serves one request at a time;
    /// raising this only helps when the server runs several replicas.
    pub concurrency: usize,

    /// Output shape requested from the model. Default: [`OutputFormat::Markdown`].
    pub format: OutputFormat,

    /// Descend into subdirectories when the batch input is a directory. Default: false.
    pub recursive: bool,

    /// Run grayscale + CLAHE + denoise before encoding. Default: true.
    pub preprocess: bool,

    /// Extra attempts for a failed inference call. Default: 0.
    ///
    /// Only the HTTP call is repeated; the image is decoded and enhanced once.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: None (HTTP client default).
    pub request_timeout_secs: Option<u64>,

    /// Replaces the format template entirely when set.
    pub custom_prompt: Option<String>,

    /// Language the model should write the extracted text in, e.g. "Simplified Chinese".
    pub language: Option<String>,

    /// Enhancement constants. Default: [`EnhanceParams::default()`].
    pub enhance: EnhanceParams,

    /// Pre-constructed backend. Takes precedence over `endpoint`/`model`.
    pub backend: Option<Arc<dyn VisionBackend>>,

    /// Optional progress callback for per-item events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: DEFAULT_MODEL.to_string(),
            concurrency: 1,
            format: OutputFormat::default(),
            recursive: false,
            preprocess: true,
            max_retries: 0,
            retry_backoff_ms: 500,
            request_timeout_secs: None,
            custom_prompt: None,
            language: None,
            enhance: EnhanceParams::default(),
            backend: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("concurrency", &self.concurrency)
            .field("format", &self.format)
            .field("recursive", &self.recursive)
            .field("preprocess", &self.preprocess)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("custom_prompt", &self.custom_prompt)
            .field("language", &self.language)
            .field("enhance", &self.enhance)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn VisionBackend>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// The endpoint requests go to, after applying the fallback chain.
    pub fn resolved_endpoint(&self) -> String {
        let raw = self
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| std::env::var("OLLAMA_HOST").ok().filter(|e| !e.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        normalise_endpoint(&raw)
    }
}

/// Add a scheme to bare `host:port` values and drop trailing slashes.
fn normalise_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn recursive(mut self, v: bool) -> Self {
        self.config.recursive = v;
        self
    }

    pub fn preprocess(mut self, v: bool) -> Self {
        self.config.preprocess = v;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.custom_prompt = Some(prompt.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = Some(language.into());
        self
    }

    pub fn enhance(mut self, params: EnhanceParams) -> Self {
        self.config.enhance = params;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(OcrError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.model.trim().is_empty() && c.backend.is_none() {
            return Err(OcrError::InvalidConfig("Model name must not be empty".into()));
        }
        if c.request_timeout_secs == Some(0) {
            return Err(OcrError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        c.enhance.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output shape requested from the vision model.
///
/// Each variant is bound to a fixed instruction template in
/// [`crate::prompts`]. Only [`OutputFormat::Json`] changes post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Headings, lists, emphasis and tables in Markdown. (default)
    #[default]
    Markdown,
    /// Plain text, original line breaks kept.
    Text,
    /// A JSON object grouping text by logical section.
    Json,
    /// Labelled sections, tables as rows, nested lists.
    Structured,
    /// One `key: value` pair per line.
    KeyValue,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Markdown,
        OutputFormat::Text,
        OutputFormat::Json,
        OutputFormat::Structured,
        OutputFormat::KeyValue,
    ];

    /// Lenient lookup: unknown names select [`OutputFormat::Text`].
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::debug!("Unknown output format '{}', using text", name);
            OutputFormat::Text
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Structured => "structured",
            OutputFormat::KeyValue => "key_value",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "structured" => Ok(OutputFormat::Structured),
            "key_value" | "kv" => Ok(OutputFormat::KeyValue),
            other => Err(OcrError::InvalidConfig(format!(
                "Unknown output format '{other}' (expected markdown, text, json, structured or key_value)"
            ))),
        }
    }
}

/// Constants for the grayscale → CLAHE → non-local-means pipeline.
///
/// The defaults match the classic OpenCV settings for scanned documents:
/// `createCLAHE(2.0, (8, 8))` and `fastNlMeansDenoising` with `h = 3`,
/// a 7×7 template and a 21×21 search window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhanceParams {
    /// CLAHE clip limit, relative to a flat histogram. Default: 2.0.
    pub clip_limit: f32,
    /// Number of CLAHE tiles along each axis. Default: 8.
    pub tile_grid: u32,
    /// Denoising filter strength `h`. Default: 3.0.
    pub denoise_strength: f32,
    /// Side of the square patch compared between pixels (odd). Default: 7.
    pub template_window: u32,
    /// Side of the square neighbourhood searched for similar patches (odd). Default: 21.
    pub search_window: u32,
}

impl Default for EnhanceParams {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tile_grid: 8,
            denoise_strength: 3.0,
            template_window: 7,
            search_window: 21,
        }
    }
}

impl EnhanceParams {
    fn validate(&self) -> Result<(), OcrError> {
        if self.clip_limit.is_nan() || self.clip_limit <= 0.0 {
            return Err(OcrError::InvalidConfig(format!(
                "CLAHE clip limit must be > 0, got {}",
                self.clip_limit
            )));
        }
        if self.tile_grid == 0 {
            return Err(OcrError::InvalidConfig("CLAHE tile grid must be ≥ 1".into()));
        }
        if self.denoise_strength.is_nan() || self.denoise_strength <= 0.0 {
            return Err(OcrError::InvalidConfig(format!(
                "Denoise strength must be > 0, got {}",
                self.denoise_strength
            )));
        }
        for (name, v) in [
            ("template", self.template_window),
            ("search", self.search_window),
        ] {
            if v == 0 || v % 2 == 0 {
                return Err(OcrError::InvalidConfig(format!(
                    "Denoise {name} window must be a positive odd number, got {v}"
                )));
            }
        }
        Ok(())
    }
}
