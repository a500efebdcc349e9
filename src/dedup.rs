//! Window filtering and deduplication against historical state.
//!
//! Both operations are pure: the orchestrator applies [`is_in_window`]
//! while extracting (out-of-window records are dropped immediately) and
//! [`unseen`] after aggregation to decide what is worth reporting and
//! alerting on.

use crate::history::HistoricalState;
use crate::models::VulnRecord;
use chrono::{DateTime, FixedOffset};

/// True when the record was published strictly after the boundary.
///
/// A record whose stored timestamp does not re-parse compares as
/// out-of-window rather than panicking or erroring.
pub fn is_in_window(record: &VulnRecord, boundary: &DateTime<FixedOffset>) -> bool {
    record
        .published_instant()
        .map(|instant| instant > *boundary)
        .unwrap_or(false)
}

/// Keep only the records published strictly after the boundary.
pub fn in_window(records: Vec<VulnRecord>, boundary: &DateTime<FixedOffset>) -> Vec<VulnRecord> {
    records
        .into_iter()
        .filter(|record| is_in_window(record, boundary))
        .collect()
}

/// Keep only the records whose identifier the historical state has not seen.
pub fn unseen(records: &[VulnRecord], history: &HistoricalState) -> Vec<VulnRecord> {
    records
        .iter()
        .filter(|record| !history.contains(&record.id))
        .cloned()
        .collect()
}
