//! Document rasterisation: render the first page of a PDF via pdfium.
//!
//! Only page one is used; a multi-page scan is one OCR item, not many.
//!
//! The document is loaded from the bytes the normalizer already read, so the
//! render never touches the original path (no non-ASCII path issues) and never
//! writes a temporary file.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. Capping the longest edge keeps memory bounded
//! and keeps the denoiser's cost predictable.

use crate::error::ItemError;
use image::DynamicImage;
use once_cell::sync::OnceCell;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Longest edge of a rendered page, in pixels.
pub const MAX_RENDERED_PIXELS: i32 = 2000;

/// Process-wide binding; `thread_safe` serialises calls into the library.
static PDFIUM: OnceCell<Pdfium> = OnceCell::new();

/// Whether `bytes` start with the PDF magic number.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// Bind to a pdfium shared library.
///
/// `PDFIUM_LIB_PATH` may name the library file itself or the directory that
/// holds it; otherwise the system library search path is used. A failed bind
/// is not cached, so a later item tries again.
fn bind_pdfium() -> Result<Pdfium, String> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.trim().is_empty() => {
            let p = Path::new(&p);
            if p.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
            } else {
                Pdfium::bind_to_library(p)
            }
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| format!("{e:?}"))?;

    Ok(Pdfium::new(bindings))
}

/// Render page one of the PDF held in `bytes`.
///
/// Blocking: call from `spawn_blocking`. `path` is only used for errors.
pub fn render_first_page(bytes: &[u8], path: &Path) -> Result<DynamicImage, ItemError> {
    let unreadable = |detail: String| ItemError::UnreadableDocument {
        path: path.to_path_buf(),
        detail,
    };

    let pdfium = PDFIUM.get_or_try_init(bind_pdfium).map_err(|e| {
        unreadable(format!(
            "PDFium library unavailable ({e}). Set PDFIUM_LIB_PATH=/path/to/libpdfium."
        ))
    })?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| unreadable(format!("cannot open document: {e:?}")))?;

    let pages = document.pages();
    if pages.is_empty() {
        return Err(unreadable("document contains no pages".into()));
    }

    let page = pages
        .first()
        .map_err(|e| unreadable(format!("cannot load first page: {e:?}")))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(MAX_RENDERED_PIXELS)
        .set_maximum_height(MAX_RENDERED_PIXELS);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| unreadable(format!("rasterisation failed: {e:?}")))?;

    let image = bitmap.as_image();
    if image.width() == 0 || image.height() == 0 {
        return Err(unreadable("first page rendered to an empty bitmap".into()));
    }

    debug!(
        "Rendered page 1/{} of '{}' → {}x{} px",
        pages.len(),
        path.display(),
        image.width(),
        image.height()
    );

    Ok(image)
}
