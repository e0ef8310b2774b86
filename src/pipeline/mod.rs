//! Pipeline stages for single-image OCR.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested without the others and without a running model.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ enhance ──▶ encode ──▶ llm ──▶ postprocess
//! (paths)   (decode/pdf)  (CLAHE+NLM) (base64)   (HTTP)  (json reindent)
//! ```
//!
//! 1. [`input`]:     expand a file, directory or list into source paths
//! 2. [`normalize`]: read bytes and decode them; PDFs go through [`render`]
//! 3. [`enhance`]:   grayscale, local contrast, denoise (optional)
//! 4. [`encode`]:    PNG-encode and base64-wrap for the request body
//! 5. [`llm`]:       the only stage with network I/O; retry lives here
//! 6. [`postprocess`]: re-indent JSON replies, pass everything else through
//!
//! Stages 2–4 are CPU-bound and run inside `spawn_blocking`.

pub mod encode;
pub mod enhance;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod postprocess;
pub mod render;
