//! Input resolution: turn what the caller passed into the list of source paths.
//!
//! A batch input is either one path (a file or a directory) or an explicit
//! list. Directories are scanned for supported extensions, recursing only on
//! request; files and explicit lists are used verbatim, so a caller can push
//! an oddly-named file through the pipeline and get a precise error back
//! instead of having it silently skipped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions picked up by a directory scan (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "pdf"];

/// What the caller asked to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchInput {
    /// A single file, or a directory to scan.
    Path(PathBuf),
    /// Explicit paths, used as given.
    List(Vec<PathBuf>),
}

impl From<PathBuf> for BatchInput {
    fn from(p: PathBuf) -> Self {
        BatchInput::Path(p)
    }
}

impl From<&Path> for BatchInput {
    fn from(p: &Path) -> Self {
        BatchInput::Path(p.to_path_buf())
    }
}

impl From<&str> for BatchInput {
    fn from(s: &str) -> Self {
        BatchInput::Path(PathBuf::from(s))
    }
}

impl From<String> for BatchInput {
    fn from(s: String) -> Self {
        BatchInput::Path(PathBuf::from(s))
    }
}

impl From<Vec<PathBuf>> for BatchInput {
    fn from(v: Vec<PathBuf>) -> Self {
        BatchInput::List(v)
    }
}

impl From<Vec<String>> for BatchInput {
    fn from(v: Vec<String>) -> Self {
        BatchInput::List(v.into_iter().map(PathBuf::from).collect())
    }
}

impl From<&[PathBuf]> for BatchInput {
    fn from(v: &[PathBuf]) -> Self {
        BatchInput::List(v.to_vec())
    }
}

/// Expand the input into the ordered, duplicate-free list of sources.
///
/// Duplicates are dropped (first occurrence wins) so every path maps to
/// exactly one entry in the report.
pub fn discover(input: &BatchInput, recursive: bool) -> Vec<PathBuf> {
    let paths = match input {
        BatchInput::Path(p) if p.is_dir() => scan_directory(p, recursive),
        BatchInput::Path(p) => vec![p.clone()],
        BatchInput::List(list) => list.clone(),
    };

    let mut seen = HashSet::with_capacity(paths.len());
    let unique: Vec<PathBuf> = paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect();

    debug!("Discovered {} source(s)", unique.len());
    unique
}

/// List supported files under `dir`, sorted by name at each level.
fn scan_directory(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };

    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable directory entry: {}", e);
                None
            }
        })
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_supported(p))
        .collect()
}

/// Whether a directory scan would pick up `path`.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Whether the extension names the multi-page document format.
pub fn is_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Map `path` to a form the platform file layer can open directly.
///
/// On Windows the path is canonicalised to its verbatim (`\\?\`) form, which
/// sidesteps legacy code-page and `MAX_PATH` limits for non-ASCII or deeply
/// nested paths. Elsewhere the path is returned unchanged.
#[cfg(windows)]
pub fn resolve_readable_path(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(e) => {
            debug!("Could not canonicalise '{}': {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

/// Map `path` to a form the platform file layer can open directly.
///
/// No-op on this platform: the OS accepts any byte-string path.
#[cfg(not(windows))]
pub fn resolve_readable_path(path: &Path) -> PathBuf {
    path.to_path_buf()
}
