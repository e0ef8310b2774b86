//! Instruction templates sent to the vision model, one per [`OutputFormat`].
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing how a format is requested means
//!    editing exactly one constant.
//!
//! 2. **Testability**: unit tests can inspect prompts directly without a
//!    running model.
//!
//! Callers can replace the template via
//! [`crate::config::OcrConfig::custom_prompt`]; the constants here are used
//! only when no override is provided.

use crate::config::{OcrConfig, OutputFormat};

pub const MARKDOWN_PROMPT: &str = r#"Analyse the provided image and output the extracted text as Markdown:
- Use headings (#, ##, ###) that follow the visual hierarchy of titles and sections.
- Use - for list items and keep the original list structure and nesting.
- Use **bold** and *italic* where the image emphasises text.
- Render tables as Markdown pipe tables.
- Keep the text hierarchy, layout and formatting of the image as closely as possible.
- Extract every visible piece of text, including partially covered or rotated text.
- Output only the Markdown, with no commentary and no surrounding code fence."#;

pub const TEXT_PROMPT: &str = r#"Extract all visible text from the provided image and output it as plain text:
- Keep the original text layout and line breaks as closely as possible.
- Include all visible text, even if partially covered, rotated or in an unusual font.
- Do not add formatting, labels or metadata; output only the text itself.
- Make the transcription clean and accurate, avoiding typical OCR mistakes."#;

pub const JSON_PROMPT: &str = r#"Extract all visible text from the provided image and output it as a single JSON object:
- Group the text into logical parts (title, body, paragraphs, tables, lists, footer) using descriptive keys.
- Keep the hierarchy of the content so it mirrors the visual layout of the image.
- Represent tables as nested arrays organised by rows and columns.
- Include all visible text, even if partially covered or rotated.
- Mark content that cannot be read as "unreadable".
- Output only valid JSON with no commentary and no surrounding code fence.
Example:
{
  "title": "This is the title",
  "body": "This is the body text",
  "table": [["Col 1", "Col 2"], ["Data 1", "Data 2"]],
  "list": ["Item 1", "Item 2"]
}"#;

pub const STRUCTURED_PROMPT: &str = r#"Extract all visible text from the provided image and output it in a structured layout:
- Identify tables and keep their rows and columns.
- Extract ordered and unordered lists and keep their nesting.
- Keep the hierarchy of titles, subtitles and paragraphs using clear labels or indentation.
- Include all visible text, even if partially covered or rotated.
- Mark content that cannot be read as [unreadable].
Example:
Title: This is the title
Body: This is the body text
Table:
  Row 1: Col 1, Col 2, Col 3
  Row 2: Data 1, Data 2, Data 3
List:
  Item 1
  Item 2"#;

pub const KEY_VALUE_PROMPT: &str = r#"Extract every piece of text in the provided image that forms a key-value pair:
- Identify labels (keys) and their values, even when they are visually separated.
- Extract form fields together with their contents.
- Output one pair per line in the form "key: value".
- When a key has several values, separate them with commas.
- Include all visible pairs, even if partially covered or rotated.
- Mark content that cannot be read as [unreadable]."#;

/// The fixed template bound to `format`.
pub fn template_for(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Markdown => MARKDOWN_PROMPT,
        OutputFormat::Text => TEXT_PROMPT,
        OutputFormat::Json => JSON_PROMPT,
        OutputFormat::Structured => STRUCTURED_PROMPT,
        OutputFormat::KeyValue => KEY_VALUE_PROMPT,
    }
}

/// Template lookup by name; unknown names get the text template.
pub fn template_for_name(name: &str) -> &'static str {
    template_for(OutputFormat::from_name(name))
}

/// Build the full instruction for one request.
///
/// A custom prompt replaces the template; the language line is appended to
/// either.
pub fn build_prompt(config: &OcrConfig) -> String {
    let base = config
        .custom_prompt
        .as_deref()
        .unwrap_or_else(|| template_for(config.format));

    match config.language.as_deref().map(str::trim) {
        Some(lang) if !lang.is_empty() => {
            format!("{base}\n- Write all extracted text in {lang}.")
        }
        _ => base.to_string(),
    }
}
