//! Image encoding: `DynamicImage` → base64 PNG string for the request body.
//!
//! The generate API takes images as bare base64 strings (no data-URI prefix)
//! in its `images` array.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as base64 PNG.
///
/// ## Why PNG?
/// Lossless compression preserves text crispness. JPEG artefacts around glyph
/// edges undo the enhancement step and confuse vision models.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(b64)
}
