//! Data models for vulnerability records and the run window.
//!
//! This module defines the core data structures used throughout the application:
//! - [`VulnRecord`]: One vulnerability extracted from an NVD search result row
//! - [`RunWindow`]: The publication-date boundary a run scans against
//! - [`PUBLISHED_FORMAT`]: The canonical timestamp format shared by the
//!   parser and the formatter
//!
//! Published timestamps are stored as canonical strings rather than parsed
//! values so the structured dump stays byte-stable across runs. Comparisons
//! re-parse the string through the same format constant.

use chrono::{DateTime, Duration, FixedOffset, Local};
use serde::{Deserialize, Serialize};

/// Canonical format for published timestamps, e.g.
/// `March 28, 2025; 03:15:16 PM +0000`.
///
/// The same constant drives both parsing (of the free-text date on the
/// result page, which chrono accepts with unpadded hours) and formatting
/// (of the canonical string persisted to disk). Using one constant for the
/// pair keeps the stored representation and the window comparison from
/// drifting apart.
pub const PUBLISHED_FORMAT: &str = "%B %d, %Y; %I:%M:%S %p %z";

/// Parse a published timestamp in the canonical format.
///
/// Accepts the page's free-text rendering (unpadded hour) as well as the
/// canonical string itself.
pub fn parse_published(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(text.trim(), PUBLISHED_FORMAT).ok()
}

/// A vulnerability record extracted from one result-page row.
///
/// # Fields
///
/// * `id` - The CVE identifier, taken from the detail link text. Non-empty
///   and stable across runs for the same vulnerability; it keys the
///   structured dump and drives deduplication.
/// * `link` - Absolute URL of the detail page.
/// * `published` - Publication instant as a canonical string (see
///   [`PUBLISHED_FORMAT`]).
/// * `cvss` - Severity label: `"V3.x: <score> <tier>"`, `"V2.0: <score>"`,
///   or `"N/A"` when the page carries no usable score.
/// * `summary` - Description text, `"N/A"` when the page omits it. Never
///   truncated in storage; only console logging shortens it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnRecord {
    pub id: String,
    pub link: String,
    pub published: String,
    pub cvss: String,
    pub summary: String,
}

impl VulnRecord {
    /// Re-parse the canonical published string into an instant.
    ///
    /// Returns `None` when the stored string is not canonical (possible for
    /// records recovered from a hand-edited report file); such records
    /// compare as out-of-window.
    pub fn published_instant(&self) -> Option<DateTime<FixedOffset>> {
        parse_published(&self.published)
    }
}

/// The publication-date boundary for one run.
///
/// The boundary is local midnight of the day `day_ago` days before now.
/// Only records published strictly after it are in scope, and its calendar
/// date names the historical-state files, so re-running on the same day
/// with the same offset resolves to the same files.
#[derive(Debug, Clone, Copy)]
pub struct RunWindow {
    pub boundary: DateTime<FixedOffset>,
}

impl RunWindow {
    /// Compute the window for a run starting now.
    pub fn from_day_offset(day_ago: i64) -> Self {
        let day = Local::now() - Duration::days(day_ago);
        let midnight = day.date_naive().and_hms_opt(0, 0, 0).unwrap();
        // Local midnight can fall inside a DST gap; degrade to the raw instant.
        let boundary = midnight.and_local_timezone(Local).earliest().unwrap_or(day);
        Self {
            boundary: boundary.fixed_offset(),
        }
    }

    /// `YYYYMMDD` tag naming the historical-state files for this window.
    pub fn date_tag(&self) -> String {
        self.boundary.format("%Y%m%d").to_string()
    }
}
