//! # edgequake-ocr
//!
//! Batch OCR through a locally hosted Vision Language Model (VLM).
//!
//! ## Why this crate?
//!
//! Classic OCR engines struggle with phone photos, mixed scripts, tables and
//! forms. A vision model served locally (Ollama) reads them far better and
//! can be asked for the output shape you need: Markdown, plain text, JSON,
//! labelled sections, or key-value pairs. This crate does the plumbing
//! around it: it finds the files, cleans up the images, talks to the
//! endpoint with bounded concurrency, and accounts for every input.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file / directory / list
//!  │
//!  ├─ 1. Discover   supported extensions, optional recursion
//!  ├─ 2. Normalize  decode image bytes; first page of a PDF via pdfium
//!  ├─ 3. Enhance    grayscale → CLAHE → non-local-means (spawn_blocking)
//!  ├─ 4. Encode     PNG → base64
//!  ├─ 5. Infer      POST /api/generate, optional retry with backoff
//!  ├─ 6. Polish     re-indent JSON replies
//!  └─ 7. Report     results / errors / statistics
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocr::{process_batch, OcrConfig, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoint from OLLAMA_HOST, else http://localhost:11434
//!     let config = OcrConfig::builder()
//!         .format(OutputFormat::Markdown)
//!         .recursive(true)
//!         .build()?;
//!     let report = process_batch("scans/", &config).await?;
//!     for (path, text) in &report.results {
//!         println!("## {path}\n\n{text}\n");
//!     }
//!     eprintln!("{}/{} failed", report.statistics.failed, report.statistics.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `eqocr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-ocr = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Model
//!
//! | Model | Size | Notes |
//! |-------|------|-------|
//! | `llama3.2-vision:11b` | 7.9 GB | Default, best on dense documents |
//! | `llava:7b`            | 4.7 GB | Faster, fine for short receipts and signs |
//!
//! PDF inputs need a pdfium shared library; set `PDFIUM_LIB_PATH` when it is
//! not on the system search path.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EnhanceParams, OcrConfig, OcrConfigBuilder, OutputFormat, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use error::{InferenceError, ItemError, OcrError, PreprocessError};
pub use output::{BatchReport, BatchStatistics};
pub use pipeline::input::{discover, BatchInput, SUPPORTED_EXTENSIONS};
pub use pipeline::llm::{OllamaClient, VisionBackend};
pub use process::{
    check_model, process_batch, process_batch_sync, process_bytes, process_item,
    process_item_sync, write_report,
};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{process_stream, ItemStream};
