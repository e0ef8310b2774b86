//! Image enhancement: grayscale → CLAHE → non-local-means denoise.
//!
//! Scans and phone photos of documents usually suffer from two problems that
//! hurt recognition more than resolution does: uneven lighting and sensor or
//! compression noise. The pipeline here addresses both with the classic
//! document-cleanup pair.
//!
//! ## Why CLAHE instead of plain histogram equalisation?
//!
//! Global equalisation stretches the whole page with one curve, so a shadow in
//! one corner stays dark. CLAHE equalises each tile separately and blends the
//! per-tile curves bilinearly, while the clip limit stops flat paper regions
//! from having their noise amplified into speckle.
//!
//! ## Why non-local means?
//!
//! A Gaussian or median filter blurs glyph edges. Non-local means averages a
//! pixel only with pixels whose *surrounding patch* looks alike, so strokes
//! are kept while paper texture is smoothed.
//!
//! Every stage is deterministic: identical input and parameters always produce
//! byte-identical output.

use crate::config::EnhanceParams;
use crate::error::PreprocessError;
use image::{DynamicImage, GrayImage};
use tracing::debug;

/// Number of grey levels in an 8-bit image.
const BINS: usize = 256;

/// Exponent beyond which a patch weight (< 1e-3) is dropped entirely.
const WEIGHT_CUTOFF: f32 = 6.9;

/// Run the full enhancement pipeline. The output has the input's dimensions.
pub fn enhance(img: &DynamicImage, params: &EnhanceParams) -> Result<GrayImage, PreprocessError> {
    let gray = img.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return Err(PreprocessError::EmptyImage);
    }

    let contrasted = clahe(&gray, params.clip_limit, params.tile_grid)?;
    let denoised = denoise_nl_means(
        &contrasted,
        params.denoise_strength,
        params.template_window,
        params.search_window,
    )?;

    debug!(
        "Enhanced {}x{} image (clip={}, grid={}, h={})",
        denoised.width(),
        denoised.height(),
        params.clip_limit,
        params.tile_grid,
        params.denoise_strength
    );
    Ok(denoised)
}

// ── CLAHE ────────────────────────────────────────────────────────────────

/// Contrast Limited Adaptive Histogram Equalization.
///
/// The image is split into `grid × grid` tiles (fewer when the image is
/// smaller than the grid). Each tile's histogram is clipped at
/// `clip_limit × area / 256`, the excess is spread evenly over all bins, and
/// the resulting CDF becomes the tile's lookup table. Each output pixel
/// blends the tables of the four nearest tile centres.
pub fn clahe(img: &GrayImage, clip_limit: f32, grid: u32) -> Result<GrayImage, PreprocessError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage);
    }
    if grid == 0 || clip_limit.is_nan() || clip_limit <= 0.0 {
        return Err(PreprocessError::InvalidParameters(format!(
            "clip_limit={clip_limit}, grid={grid}"
        )));
    }

    let tile_w = width.div_ceil(grid.min(width));
    let tile_h = height.div_ceil(grid.min(height));
    let tiles_x = width.div_ceil(tile_w) as usize;
    let tiles_y = height.div_ceil(tile_h) as usize;

    let src = img.as_raw();
    let w = width as usize;

    let mut luts: Vec<[u8; BINS]> = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w as usize;
            let y0 = ty * tile_h as usize;
            let x1 = (x0 + tile_w as usize).min(w);
            let y1 = (y0 + tile_h as usize).min(height as usize);

            let mut hist = [0u32; BINS];
            for y in y0..y1 {
                for &v in &src[y * w + x0..y * w + x1] {
                    hist[v as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            luts.push(tile_lut(&mut hist, area, clip_limit));
        }
    }

    // Per-column tile indices and blend factors, shared by every row.
    let cols: Vec<(usize, usize, f32)> = (0..width)
        .map(|x| neighbours(x, tile_w, tiles_x))
        .collect();

    let mut out = GrayImage::new(width, height);
    let dst: &mut [u8] = &mut out;
    for y in 0..height as usize {
        let (ty1, ty2, ya) = neighbours(y as u32, tile_h, tiles_y);
        let row = &src[y * w..(y + 1) * w];
        for (x, &v) in row.iter().enumerate() {
            let (tx1, tx2, xa) = cols[x];
            let v = v as usize;
            let top = luts[ty1 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty1 * tiles_x + tx2][v] as f32 * xa;
            let bottom = luts[ty2 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty2 * tiles_x + tx2][v] as f32 * xa;
            let blended = top * (1.0 - ya) + bottom * ya;
            dst[y * w + x] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(out)
}

/// Clip `hist`, redistribute the excess and return the tile's lookup table.
fn tile_lut(hist: &mut [u32; BINS], area: u32, clip_limit: f32) -> [u8; BINS] {
    let clip = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);

    let mut clipped = 0u32;
    for h in hist.iter_mut() {
        if *h > clip {
            clipped += *h - clip;
            *h = clip;
        }
    }

    let batch = clipped / BINS as u32;
    let mut residual = clipped - batch * BINS as u32;
    for h in hist.iter_mut() {
        *h += batch;
    }
    if residual > 0 {
        let step = (BINS / residual as usize).max(1);
        for i in (0..BINS).step_by(step) {
            if residual == 0 {
                break;
            }
            hist[i] += 1;
            residual -= 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; BINS];
    let mut cdf = 0u32;
    for (i, &h) in hist.iter().enumerate() {
        cdf += h;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// The two tile indices around `pos` and the weight of the second one.
fn neighbours(pos: u32, tile: u32, tiles: usize) -> (usize, usize, f32) {
    let f = pos as f32 / tile as f32 - 0.5;
    let lo = f.floor();
    let weight = f - lo;
    let last = tiles as i64 - 1;
    let lo_i = (lo as i64).clamp(0, last) as usize;
    let hi_i = (lo as i64 + 1).clamp(0, last) as usize;
    (lo_i, hi_i, weight)
}

// ── Non-local means ──────────────────────────────────────────────────────

/// Non-local-means denoising for 8-bit grayscale images.
///
/// Every pixel becomes a weighted mean of the pixels in its
/// `search × search` neighbourhood. The weight of a candidate is
/// `exp(-ssd / (template² · h²))`, where `ssd` is the summed squared
/// difference between the `template × template` patches centred on the two
/// pixels. Borders are replicated.
///
/// Patch sums are computed per search offset with an integral image, so the
/// cost is `O(width · height · search²)` independent of the template size.
pub fn denoise_nl_means(
    img: &GrayImage,
    h: f32,
    template: u32,
    search: u32,
) -> Result<GrayImage, PreprocessError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage);
    }
    if h.is_nan() || h <= 0.0 || template % 2 == 0 || search % 2 == 0 {
        return Err(PreprocessError::InvalidParameters(format!(
            "h={h}, template={template}, search={search}"
        )));
    }

    let (w, hgt) = (width as usize, height as usize);
    let tr = (template / 2) as usize;
    let sr = (search / 2) as usize;
    let pad = tr + sr;

    let pw = w + 2 * pad;
    let padded = replicate_pad(img.as_raw(), w, hgt, pad);

    // Region whose squared differences feed the patch sums.
    let rw = w + 2 * tr;
    let rh = hgt + 2 * tr;
    let t = 2 * tr + 1;

    let denom = (t * t) as f32 * h * h;
    let max_ssd = t * t * 255 * 255;
    let table_len = ((denom * WEIGHT_CUTOFF).ceil() as usize + 1).min(max_ssd + 1);
    let weights: Vec<f32> = (0..table_len)
        .map(|s| (-(s as f32) / denom).exp())
        .collect();

    let mut acc_w = vec![0f32; w * hgt];
    let mut acc_v = vec![0f32; w * hgt];
    let mut integral = vec![0u64; (rw + 1) * (rh + 1)];

    for dy in 0..search as usize {
        for dx in 0..search as usize {
            // Integral of (P[r + sr] - P[r + (dy, dx)])² over the region.
            for ry in 0..rh {
                let a_row = &padded[(ry + sr) * pw + sr..(ry + sr) * pw + sr + rw];
                let b_row = &padded[(ry + dy) * pw + dx..(ry + dy) * pw + dx + rw];
                let mut row_sum = 0u64;
                for rx in 0..rw {
                    let d = a_row[rx] as i32 - b_row[rx] as i32;
                    row_sum += (d * d) as u64;
                    integral[(ry + 1) * (rw + 1) + rx + 1] =
                        integral[ry * (rw + 1) + rx + 1] + row_sum;
                }
            }

            for y in 0..hgt {
                let top = y * (rw + 1);
                let bottom = (y + t) * (rw + 1);
                let candidate_row = (y + dy + tr) * pw + tr + dx;
                for x in 0..w {
                    let ssd = integral[bottom + x + t] + integral[top + x]
                        - integral[top + x + t]
                        - integral[bottom + x];
                    let Some(&weight) = weights.get(ssd as usize) else {
                        continue;
                    };
                    let i = y * w + x;
                    acc_w[i] += weight;
                    acc_v[i] += weight * padded[candidate_row + x] as f32;
                }
            }
        }
    }

    // The zero offset always contributes weight 1, so acc_w >= 1.
    let mut out = GrayImage::new(width, height);
    for (dst, (v, wt)) in out.iter_mut().zip(acc_v.iter().zip(&acc_w)) {
        *dst = (v / wt).round().clamp(0.0, 255.0) as u8;
    }
    Ok(out)
}

/// Copy `src` into a buffer grown by `pad` on every side, repeating edge pixels.
fn replicate_pad(src: &[u8], w: usize, h: usize, pad: usize) -> Vec<u8> {
    let pw = w + 2 * pad;
    let ph = h + 2 * pad;
    let mut out = vec![0u8; pw * ph];
    for py in 0..ph {
        let sy = py.saturating_sub(pad).min(h - 1);
        let src_row = &src[sy * w..(sy + 1) * w];
        let dst_row = &mut out[py * pw..(py + 1) * pw];
        for (px, d) in dst_row.iter_mut().enumerate() {
            let sx = px.saturating_sub(pad).min(w - 1);
            *d = src_row[sx];
        }
    }
    out
}
