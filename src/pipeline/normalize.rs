//! Normalisation: any supported source → one decoded raster image.
//!
//! Raw bytes are read through [`resolve_readable_path`] and then decoded in
//! memory, so the decoder never sees the original path. The container is
//! sniffed from the bytes (PDF magic, then the image crate's own format
//! guessing); the extension is only a fallback hint for documents.

use crate::error::ItemError;
use crate::pipeline::input::{is_document_extension, resolve_readable_path};
use crate::pipeline::render::{is_pdf, render_first_page};
use image::DynamicImage;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// Read and decode `path` into a single image.
///
/// Blocking: call from `spawn_blocking`.
pub fn normalize(path: &Path) -> Result<DynamicImage, ItemError> {
    let readable = resolve_readable_path(path);

    let bytes = std::fs::read(&readable).map_err(|e| ItemError::FileNotFound {
        path: path.to_path_buf(),
        detail: match e.kind() {
            ErrorKind::NotFound => "no such file".to_string(),
            ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => e.to_string(),
        },
    })?;

    decode_bytes(&bytes, path)
}

/// Decode already-loaded bytes; `path` is used for errors and the extension hint.
pub fn decode_bytes(bytes: &[u8], path: &Path) -> Result<DynamicImage, ItemError> {
    if bytes.is_empty() {
        return Err(ItemError::UnreadableImage {
            path: path.to_path_buf(),
            detail: "file is empty".into(),
        });
    }

    if is_pdf(bytes) || is_document_extension(path) {
        return render_first_page(bytes, path);
    }

    let image = image::load_from_memory(bytes).map_err(|e| ItemError::UnreadableImage {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    debug!(
        "Decoded '{}' → {}x{} {:?}",
        path.display(),
        image.width(),
        image.height(),
        image.color()
    );
    Ok(image)
}
