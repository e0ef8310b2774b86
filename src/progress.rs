//! Progress-callback trait for per-item batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::OcrConfigBuilder::progress_callback`] to receive events as
//! the orchestrator works through a batch.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a UI widget, or a terminal progress bar
//! without the library knowing how the host application communicates. The
//! trait is `Send + Sync` so it works when items complete concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocr::{BatchProgressCallback, OcrConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, path: &Path, total: usize, text_len: usize) {
//!         let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total} {} ({text_len} bytes)", path.display());
//!     }
//! }
//!
//! let config = OcrConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes each item.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// With `concurrency > 1`, `on_item_start` may be called while other items
/// are still in flight. Exactly one of `on_item_complete` / `on_item_error`
/// fires per item, in completion order.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after discovery, before any item is dispatched.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when an item enters the pipeline.
    fn on_item_start(&self, path: &Path, total: usize) {
        let _ = (path, total);
    }

    /// Called when an item produced text.
    ///
    /// # Arguments
    /// * `text_len`: byte length of the extracted text
    fn on_item_complete(&self, path: &Path, total: usize, text_len: usize) {
        let _ = (path, total, text_len);
    }

    /// Called when an item failed.
    ///
    /// # Arguments
    /// * `error`: human-readable error description
    fn on_item_error(&self, path: &Path, total: usize, error: &str) {
        let _ = (path, total, error);
    }

    /// Called once after every item has been attempted.
    fn on_batch_complete(&self, total: usize, successful: usize) {
        let _ = (total, successful);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::OcrConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
