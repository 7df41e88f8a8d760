//! Error context extraction.
//!
//! Finds every record whose message contains a target substring and cuts a
//! window of neighbouring records around each match.
//!
//! # Algorithm
//!
//! 1. Scan the records once, collecting indices where `message` contains the
//!    needle (case-sensitive, plain substring).
//! 2. Keep only the first `max_occurrences` matches.
//! 3. For match `i`, emit `records[max(0, i - W) .. min(N, i + W + 1)]`.
//!
//! Windows of nearby matches may overlap; each is emitted on its own.
//!
//! # Example
//!
//! ```rust
//! use rootcause::extract::{extract, ExtractOptions};
//! use rootcause::models::LogRecord;
//!
//! let records = vec![
//!     LogRecord::new("ts0", "ok"),
//!     LogRecord::new("ts1", "ERROR X"),
//!     LogRecord::new("ts2", "ok"),
//!     LogRecord::new("ts3", "ok"),
//! ];
//! let opts = ExtractOptions { window_radius: 1, ..Default::default() };
//! let out = extract(&records, "ERROR", &opts);
//! assert_eq!(out.windows.len(), 1);
//! assert_eq!(out.windows[0].records.len(), 3);
//! ```

use serde::Serialize;

use crate::models::{ContextWindow, LogRecord};

/// Window radius used when none is configured.
pub const DEFAULT_WINDOW_RADIUS: usize = 5;
/// Occurrence cap used when none is configured.
pub const DEFAULT_MAX_OCCURRENCES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Records kept on each side of a match.
    pub window_radius: usize,
    /// Matches beyond this count are dropped.
    pub max_occurrences: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            window_radius: DEFAULT_WINDOW_RADIUS,
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
        }
    }
}

/// Windows plus the number of matches seen, so callers can tell how many
/// were truncated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub windows: Vec<ContextWindow>,
    pub total_occurrences: usize,
}

impl Extraction {
    /// Matches that were found but not returned.
    pub fn truncated(&self) -> usize {
        self.total_occurrences - self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Extract context windows around each occurrence of `needle`.
///
/// Returns an empty [`Extraction`] when nothing matches; that is a normal
/// outcome. An empty needle matches every record.
pub fn extract(records: &[LogRecord], needle: &str, opts: &ExtractOptions) -> Extraction {
    let occurrences: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.message.contains(needle))
        .map(|(i, _)| i)
        .collect();

    if occurrences.is_empty() {
        tracing::debug!(needle, scanned = records.len(), "no occurrences found");
        return Extraction::default();
    }

    let windows: Vec<ContextWindow> = occurrences
        .iter()
        .take(opts.max_occurrences)
        .map(|&i| window_at(records, i, opts.window_radius))
        .collect();

    if occurrences.len() > windows.len() {
        tracing::debug!(
            found = occurrences.len(),
            kept = windows.len(),
            "occurrences truncated"
        );
    }

    Extraction {
        windows,
        total_occurrences: occurrences.len(),
    }
}

/// The clipped window `[i - radius, i + radius]` around record `i`.
fn window_at(records: &[LogRecord], i: usize, radius: usize) -> ContextWindow {
    let start = i.saturating_sub(radius);
    let end = i.saturating_add(radius).saturating_add(1).min(records.len());
    ContextWindow {
        occurrence_index: i,
        start,
        records: records[start..end].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(messages: &[&str]) -> Vec<LogRecord> {
        messages
            .iter()
            .enumerate()
            .map(|(i, m)| LogRecord::new(format!("ts{}", i), *m))
            .collect()
    }

    fn opts(radius: usize, max: usize) -> ExtractOptions {
        ExtractOptions {
            window_radius: radius,
            max_occurrences: max,
        }
    }

    #[test]
    fn test_absent_substring_is_empty() {
        let records = logs(&["ok", "fine", "all good"]);
        let out = extract(&records, "ERROR", &ExtractOptions::default());
        assert!(out.is_empty());
        assert_eq!(out.total_occurrences, 0);
        assert_eq!(out.truncated(), 0);
    }

    #[test]
    fn test_empty_input() {
        let out = extract(&[], "ERROR", &ExtractOptions::default());
        assert!(out.is_empty());
    }

    #[test]
    fn test_single_occurrence_radius_one() {
        let records = logs(&["ok", "ERROR X", "ok", "ok"]);
        let out = extract(&records, "ERROR", &opts(1, 3));
        assert_eq!(out.windows.len(), 1);
        let w = &out.windows[0];
        assert_eq!(w.occurrence_index, 1);
        assert_eq!(w.start, 0);
        assert_eq!(w.records, records[0..3].to_vec());
    }

    #[test]
    fn test_window_sizes_match_formula() {
        let mut messages = vec!["ok"; 20];
        for i in [0usize, 3, 9, 17, 19] {
            messages[i] = "ERROR here";
        }
        let records = logs(&messages);
        let n = records.len();
        let w = 5;
        let out = extract(&records, "ERROR", &opts(w, usize::MAX));
        let expected: Vec<usize> = vec![0, 3, 9, 17, 19];
        assert_eq!(
            out.windows
                .iter()
                .map(|w| w.occurrence_index)
                .collect::<Vec<_>>(),
            expected
        );
        for win in &out.windows {
            let i = win.occurrence_index;
            let size = (i + w + 1).min(n) - i.saturating_sub(w);
            assert_eq!(win.records.len(), size, "window at {}", i);
            assert_eq!(win.records[i - win.start], records[i]);
        }
    }

    #[test]
    fn test_boundaries_clip() {
        let records = logs(&["ERROR first", "ok", "ok", "ERROR last"]);
        let out = extract(&records, "ERROR", &opts(5, 3));
        assert_eq!(out.windows.len(), 2);
        assert_eq!(out.windows[0].start, 0);
        assert_eq!(out.windows[0].records.len(), 4);
        assert_eq!(out.windows[1].occurrence_index, 3);
        assert_eq!(out.windows[1].records.len(), 4);
    }

    #[test]
    fn test_max_occurrences_truncates() {
        let records = logs(&["ERROR", "ERROR", "ERROR", "ERROR", "ERROR"]);
        let out = extract(&records, "ERROR", &opts(0, 3));
        assert_eq!(out.windows.len(), 3);
        assert_eq!(out.total_occurrences, 5);
        assert_eq!(out.truncated(), 2);
        assert_eq!(
            out.windows
                .iter()
                .map(|w| w.occurrence_index)
                .collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_overlapping_windows_not_merged() {
        let records = logs(&["ok", "ERROR a", "ERROR b", "ok"]);
        let out = extract(&records, "ERROR", &opts(1, 3));
        assert_eq!(out.windows.len(), 2);
        assert_eq!(out.windows[0].records.len(), 3);
        assert_eq!(out.windows[1].records.len(), 3);
        assert_eq!(out.windows[0].records[2], out.windows[1].records[1]);
    }

    #[test]
    fn test_case_sensitive() {
        let records = logs(&["error lower", "Error mixed"]);
        let out = extract(&records, "ERROR", &ExtractOptions::default());
        assert!(out.is_empty());
    }

    #[test]
    fn test_zero_max_occurrences() {
        let records = logs(&["ERROR"]);
        let out = extract(&records, "ERROR", &opts(5, 0));
        assert!(out.windows.is_empty());
        assert_eq!(out.truncated(), 1);
    }
}
