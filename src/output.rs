//! Batch result types.
//!
//! A [`BatchReport`] is the only thing `process_batch` hands back for
//! per-item outcomes: every discovered path lands in exactly one of
//! `results` or `errors`, keyed by [`report_key`] (the path's own text for
//! ordinary Unicode paths).
//!
//! Both maps are ordered (`BTreeMap`) so the serialised report is stable
//! between runs even though items complete in arbitrary order.

use crate::error::{ItemError, OcrError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Counts for one batch. `successful + failed == total` once finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Aggregated outcome of a batch call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Extracted text per source path.
    pub results: BTreeMap<String, String>,
    /// Typed failure per source path.
    pub errors: BTreeMap<String, ItemError>,
    pub statistics: BatchStatistics,
}

/// Marks an escaped byte in a [`report_key`].
const ESCAPE: char = '\u{FFFD}';

/// Key under which `path` is stored in a report.
///
/// A path that is valid Unicode and has no U+FFFD in it maps to itself.
/// Otherwise every byte that is not valid UTF-8 becomes U+FFFD followed by
/// two hex digits, and a literal U+FFFD is doubled. Distinct paths always get
/// distinct keys.
pub fn report_key(path: &Path) -> String {
    let bytes = path.as_os_str().as_encoded_bytes();
    let mut key = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            if c == ESCAPE {
                key.push(ESCAPE);
            }
            key.push(c);
        }
        for b in chunk.invalid() {
            key.push(ESCAPE);
            key.push_str(&format!("{b:02x}"));
        }
    }
    key
}

impl BatchReport {
    /// An empty report expecting `total` items.
    pub fn with_total(total: usize) -> Self {
        Self {
            statistics: BatchStatistics {
                total,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// File one item's outcome. A path is recorded at most once; a repeat
    /// replaces the earlier outcome without double counting.
    pub fn record(&mut self, path: &Path, outcome: Result<String, ItemError>) {
        let key = report_key(path);
        self.results.remove(&key);
        self.errors.remove(&key);
        match outcome {
            Ok(text) => {
                self.results.insert(key, text);
            }
            Err(e) => {
                self.errors.insert(key, e);
            }
        }
        self.recount();
    }

    /// Recompute `successful` and `failed` from the maps.
    ///
    /// `total` is left alone; it is fixed by discovery.
    pub fn recount(&mut self) {
        self.statistics.successful = self.results.len();
        self.statistics.failed = self.errors.len();
    }

    /// Whether every expected item has been recorded.
    pub fn is_complete(&self) -> bool {
        self.statistics.successful + self.statistics.failed == self.statistics.total
    }

    /// The text extracted for `path`, if it succeeded.
    pub fn text_for(&self, path: &Path) -> Option<&str> {
        self.results.get(&report_key(path)).map(String::as_str)
    }

    /// The error recorded for `path`, if it failed.
    pub fn error_for(&self, path: &Path) -> Option<&ItemError> {
        self.errors.get(&report_key(path))
    }

    /// Paths that failed, in key order.
    pub fn failed_paths(&self) -> Vec<PathBuf> {
        self.errors.values().map(|e| e.path().to_path_buf()).collect()
    }

    /// Turn any failure into [`OcrError::PartialFailure`].
    pub fn into_result(self) -> Result<Self, OcrError> {
        if self.statistics.failed == 0 {
            Ok(self)
        } else {
            Err(OcrError::PartialFailure {
                successful: self.statistics.successful,
                failed: self.statistics.failed,
                total: self.statistics.total,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrupt(p: &str) -> ItemError {
        ItemError::UnreadableImage {
            path: PathBuf::from(p),
            detail: "bad header".into(),
        }
    }

    #[test]
    fn record_keeps_maps_disjoint() {
        let mut report = BatchReport::with_total(3);
        report.record(Path::new("a.png"), Ok("A".into()));
        report.record(Path::new("b.png"), Err(corrupt("b.png")));
        report.record(Path::new("c.png"), Ok("C".into()));

        assert_eq!(
            report.statistics,
            BatchStatistics {
                total: 3,
                successful: 2,
                failed: 1
            }
        );
        assert!(report.is_complete());
        assert_eq!(report.text_for(Path::new("a.png")), Some("A"));
        assert!(report.error_for(Path::new("b.png")).is_some());
        assert!(report.text_for(Path::new("b.png")).is_none());
    }

    #[test]
    fn unicode_paths_are_their_own_key() {
        assert_eq!(report_key(Path::new("scans/标题.png")), "scans/标题.png");
    }

    #[test]
    fn replacement_char_is_escaped() {
        assert_eq!(report_key(Path::new("a\u{FFFD}.png")), "a\u{FFFD}\u{FFFD}.png");
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_do_not_collide() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let ff = Path::new(OsStr::from_bytes(b"a\xff.png"));
        let fe = Path::new(OsStr::from_bytes(b"a\xfe.png"));
        assert_ne!(report_key(ff), report_key(fe));
        assert_eq!(report_key(ff), "a\u{FFFD}ff.png");

        let mut report = BatchReport::with_total(2);
        report.record(ff, Ok("FF".into()));
        report.record(fe, Err(corrupt("a.png")));
        assert!(report.is_complete());
        assert_eq!(report.text_for(ff), Some("FF"));
        assert!(report.error_for(fe).is_some());
    }

    #[test]
    fn re_recording_does_not_double_count() {
        let mut report = BatchReport::with_total(1);
        report.record(Path::new("a.png"), Err(corrupt("a.png")));
        report.record(Path::new("a.png"), Ok("A".into()));

        assert_eq!(report.statistics.successful, 1);
        assert_eq!(report.statistics.failed, 0);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn empty_report_is_complete() {
        let report = BatchReport::with_total(0);
        assert!(report.is_complete());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn into_result_flags_failures() {
        let mut report = BatchReport::with_total(2);
        report.record(Path::new("a.png"), Ok("A".into()));
        report.record(Path::new("b.png"), Err(corrupt("b.png")));

        match report.into_result() {
            Err(OcrError::PartialFailure {
                successful,
                failed,
                total,
            }) => assert_eq!((successful, failed, total), (1, 1, 2)),
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[test]
    fn serialised_shape() {
        let mut report = BatchReport::with_total(1);
        report.record(Path::new("scan.png"), Ok("hello".into()));

        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["results"]["scan.png"], "hello");
        assert_eq!(v["errors"], serde_json::json!({}));
        assert_eq!(
            v["statistics"],
            serde_json::json!({"total": 1, "successful": 1, "failed": 0})
        );

        let back: BatchReport = serde_json::from_value(v).unwrap();
        assert_eq!(back, report);
    }
}
