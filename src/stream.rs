//! Streaming batch API: emit item outcomes as they complete.
//!
//! ## Why stream?
//!
//! A large directory against a local model can take hours. A stream lets
//! callers show results immediately or write each file's text to disk as it
//! arrives instead of waiting for the whole report.
//!
//! Unlike [`crate::process::process_batch`], which returns only after every
//! item finishes, [`process_stream`] yields `(path, outcome)` pairs in
//! completion order. With `concurrency > 1` that is not discovery order.

use crate::config::OcrConfig;
use crate::error::{ItemError, OcrError};
use crate::pipeline::input::{self, BatchInput};
use crate::process::{resolve_backend, run_item};
use crate::prompts::build_prompt;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-item outcomes.
pub type ItemStream = Pin<Box<dyn Stream<Item = (PathBuf, Result<String, ItemError>)> + Send>>;

/// Process a batch, streaming each item's outcome as soon as it is ready.
///
/// # Example
/// ```rust,no_run
/// use edgequake_ocr::{process_stream, OcrConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = OcrConfig::builder().concurrency(2).build()?;
/// let mut items = process_stream("scans/", &config)?;
/// while let Some((path, outcome)) = items.next().await {
///     match outcome {
///         Ok(text) => println!("{}: {} chars", path.display(), text.len()),
///         Err(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn process_stream(
    input: impl Into<BatchInput>,
    config: &OcrConfig,
) -> Result<ItemStream, OcrError> {
    let paths = input::discover(&input.into(), config.recursive);
    info!("Starting streaming batch: {} item(s)", paths.len());
    stream_sources(paths, config)
}

/// Build the bounded-concurrency stream over already-discovered `paths`.
///
/// Fires `on_batch_start` once, then per-item start and completion events.
pub(crate) fn stream_sources(
    paths: Vec<PathBuf>,
    config: &OcrConfig,
) -> Result<ItemStream, OcrError> {
    let backend = resolve_backend(config)?;
    let total = paths.len();
    let concurrency = config.concurrency.max(1);
    let prompt: Arc<str> = build_prompt(config).into();
    let config = Arc::new(config.clone());

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let s = stream::iter(paths.into_iter().map(move |path| {
        let backend = Arc::clone(&backend);
        let prompt = Arc::clone(&prompt);
        let config = Arc::clone(&config);
        async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_item_start(&path, total);
            }

            let outcome = run_item(&path, &backend, &prompt, &config).await;

            if let Some(ref cb) = config.progress_callback {
                match &outcome {
                    Ok(text) => cb.on_item_complete(&path, total, text.len()),
                    Err(e) => cb.on_item_error(&path, total, &e.to_string()),
                }
            }
            (path, outcome)
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}
