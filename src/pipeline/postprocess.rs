//! Post-processing: shape the model's reply for the requested format.
//!
//! Only the `json` format is touched. Its reply is parsed and re-serialised
//! with two-space indentation so downstream tools get stable, diff-friendly
//! output. Every other format is returned exactly as the model wrote it.
//!
//! ## Why tolerate fences?
//!
//! Vision models wrap JSON in ```` ```json ```` fences often enough, despite
//! the prompt asking them not to, that rejecting those replies would throw
//! away most otherwise-valid answers. A single outer fence is unwrapped
//! before parsing.
//!
//! A reply that still does not parse is returned unchanged and logged; it
//! never turns into an item error.

use crate::config::OutputFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n```$").unwrap());

/// Turn the raw reply into the final text for `format`.
pub fn format_output(raw: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => reindent_json(raw),
        _ => raw.to_string(),
    }
}

/// Pretty-print `raw` as JSON, or return it verbatim if it is not JSON.
pub fn reindent_json(raw: &str) -> String {
    let candidate = strip_json_fence(raw);

    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => pretty,
            Err(e) => {
                warn!("Could not re-serialise JSON reply: {}", e);
                raw.to_string()
            }
        },
        Err(e) => {
            warn!(
                "Malformed structured output ({}); returning the raw reply",
                e
            );
            raw.to_string()
        }
    }
}

fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_JSON_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}
