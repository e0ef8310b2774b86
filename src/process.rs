//! Entry points: single item, in-memory bytes, whole batch.
//!
//! ## Error tiers
//!
//! Per-item problems (missing file, corrupt image, endpoint down) are always
//! an [`ItemError`] and never abort a batch. [`OcrError`] is reserved for
//! things that stop the call before any item runs, such as an HTTP client that
//! cannot be built, or for the explicit strictness of
//! [`BatchReport::into_result`].
//!
//! ## Why eager vs. streaming?
//!
//! [`process_batch`] waits for every item and returns one report. Use
//! [`crate::stream::process_stream`] to see outcomes as they complete.

use crate::config::{EnhanceParams, OcrConfig};
use crate::error::{ItemError, OcrError};
use crate::output::BatchReport;
use crate::pipeline::input::{self, BatchInput};
use crate::pipeline::llm::{self, OllamaClient, VisionBackend};
use crate::pipeline::{encode, enhance, normalize, postprocess};
use crate::prompts::build_prompt;
use crate::stream::stream_sources;
use futures::StreamExt;
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run the full pipeline on one file and return the extracted text.
///
/// # Example
/// ```rust,no_run
/// use edgequake_ocr::{process_item, OcrConfig, OutputFormat};
///
/// # #[tokio::main]
/// # async fn main() {
/// let config = OcrConfig::builder().format(OutputFormat::Text).build().unwrap();
/// match process_item("receipt.jpg", &config).await {
///     Ok(text) => println!("{text}"),
///     Err(e) => eprintln!("{e}"),
/// }
/// # }
/// ```
pub async fn process_item(
    path: impl AsRef<Path>,
    config: &OcrConfig,
) -> Result<String, ItemError> {
    let path = path.as_ref();
    let backend = resolve_backend(config).map_err(|e| ItemError::InferenceRequestError {
        path: path.to_path_buf(),
        status: None,
        detail: e.to_string(),
    })?;
    let prompt = build_prompt(config);
    run_item(path, &backend, &prompt, config).await
}

/// Synchronous wrapper around [`process_item`].
///
/// Creates a temporary tokio runtime internally; do not call from async code.
pub fn process_item_sync(path: impl AsRef<Path>, config: &OcrConfig) -> Result<String, ItemError> {
    let path = path.as_ref();
    tokio::runtime::Runtime::new()
        .map_err(|e| ItemError::Internal {
            path: path.to_path_buf(),
            detail: format!("Failed to create tokio runtime: {e}"),
        })?
        .block_on(process_item(path, config))
}

/// Run the single-item pipeline on an in-memory image or PDF.
///
/// The bytes are written to a managed [`tempfile`] that is removed when this
/// call returns, errors, or unwinds. Errors name that temporary path.
pub async fn process_bytes(bytes: &[u8], config: &OcrConfig) -> Result<String, ItemError> {
    let internal = |detail: String| ItemError::Internal {
        path: PathBuf::from("<memory>"),
        detail,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix("eqocr-")
        .tempfile()
        .map_err(|e| internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| internal(format!("tempfile write: {e}")))?;

    // `tmp` lives until the pipeline has read the bytes back.
    process_item(tmp.path(), config).await
}

/// Process a file, a directory, or an explicit list of files.
///
/// Returns `Ok` with a complete report even when every item failed;
/// check `report.statistics.failed` or call [`BatchReport::into_result`].
///
/// # Errors
/// Only setup failures that prevent any item from running.
pub async fn process_batch(
    input: impl Into<BatchInput>,
    config: &OcrConfig,
) -> Result<BatchReport, OcrError> {
    let batch_start = Instant::now();
    let paths = input::discover(&input.into(), config.recursive);
    let total = paths.len();
    info!(
        "Starting batch: {} item(s), concurrency {}, format {}",
        total, config.concurrency, config.format
    );

    let mut report = BatchReport::with_total(total);
    let mut stream = stream_sources(paths, config)?;

    while let Some((path, outcome)) = stream.next().await {
        if let Err(ref e) = outcome {
            warn!("{}", e);
        }
        report.record(&path, outcome);
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, report.statistics.successful);
    }

    info!(
        "Batch complete: {}/{} succeeded, {} failed, {:?}",
        report.statistics.successful,
        total,
        report.statistics.failed,
        batch_start.elapsed()
    );
    Ok(report)
}

/// Synchronous wrapper around [`process_batch`].
pub fn process_batch_sync(
    input: impl Into<BatchInput>,
    config: &OcrConfig,
) -> Result<BatchReport, OcrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(process_batch(input, config))
}

/// Write `report` as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_report(report: &BatchReport, path: impl AsRef<Path>) -> Result<(), OcrError> {
    let path = path.as_ref();
    let write_err = |e: std::io::Error| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| OcrError::Internal(format!("report serialisation: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!("Report written to {}", path.display());
    Ok(())
}

/// Whether the configured model is currently loaded on the endpoint.
///
/// A bare model name also matches its `:latest` tag.
pub async fn check_model(config: &OcrConfig) -> Result<bool, OcrError> {
    let client = OllamaClient::from_config(config)?;
    let running = client
        .running_models()
        .await
        .map_err(|e| OcrError::ModelQueryFailed {
            endpoint: client.endpoint().to_string(),
            detail: e.to_string(),
        })?;

    debug!("Running models: {:?}", running);
    Ok(running
        .iter()
        .any(|name| model_matches(name, &config.model)))
}

fn model_matches(running: &str, wanted: &str) -> bool {
    running == wanted || (!wanted.contains(':') && running == format!("{wanted}:latest"))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// The backend to use: the injected one, else an Ollama client.
pub(crate) fn resolve_backend(config: &OcrConfig) -> Result<Arc<dyn VisionBackend>, OcrError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let client = OllamaClient::from_config(config)?;
    debug!(
        "Using Ollama endpoint {} with model {}",
        client.endpoint(),
        client.model()
    );
    Ok(Arc::new(client))
}

/// normalize → enhance → encode → infer → post-process for one path.
///
/// Always returns an outcome for the item; nothing here panics or aborts
/// the caller's batch.
pub(crate) async fn run_item(
    path: &Path,
    backend: &Arc<dyn VisionBackend>,
    prompt: &str,
    config: &OcrConfig,
) -> Result<String, ItemError> {
    let start = Instant::now();
    let owned = path.to_path_buf();
    let preprocess = config.preprocess;
    let params = config.enhance;

    let image_b64 = tokio::task::spawn_blocking(move || prepare_image(&owned, preprocess, &params))
        .await
        .map_err(|e| ItemError::Internal {
            path: path.to_path_buf(),
            detail: format!("image task failed: {e}"),
        })??;

    let raw = llm::infer_with_retry(backend, path, prompt, &image_b64, config).await?;
    let text = postprocess::format_output(&raw, config.format);

    debug!(
        "'{}': {} bytes of {} in {:?}",
        path.display(),
        text.len(),
        config.format,
        start.elapsed()
    );
    Ok(text)
}

/// Decode, optionally enhance, and encode `path` as base64 PNG. Blocking.
fn prepare_image(path: &Path, preprocess: bool, params: &EnhanceParams) -> Result<String, ItemError> {
    let image = normalize::normalize(path)?;
    let image = if preprocess {
        enhance_owned(image, path, params)?
    } else {
        image
    };

    encode::encode_png_base64(&image).map_err(|e| ItemError::PreprocessingFailure {
        path: path.to_path_buf(),
        detail: format!("PNG encoding failed: {e}"),
    })
}

/// Replace `image` by its enhanced grayscale version.
///
/// Takes the decoded image by value so it is freed as soon as the enhanced
/// buffer exists.
fn enhance_owned(
    image: DynamicImage,
    path: &Path,
    params: &EnhanceParams,
) -> Result<DynamicImage, ItemError> {
    let gray = enhance::enhance(&image, params).map_err(|e| ItemError::PreprocessingFailure {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    drop(image);
    Ok(DynamicImage::ImageLuma8(gray))
}
