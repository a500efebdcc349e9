//! Historical state: what previous runs already saw.
//!
//! Two file kinds exist per (target, logical date), both named
//! deterministically so a same-day re-run resolves to the same files:
//!
//! ```text
//! json_dir/{target}_vulns_{YYYYMMDD}.json    # structured dump, id -> record
//! report_dir/{target}_report_{YYYYMMDD}.txt # human-readable, appended across runs
//! ```
//!
//! Loading unions both sources: the report is parsed first, then the dump
//! is overlaid so it takes precedence per key while the report fills gaps.
//! A missing or unreadable source degrades to an empty contribution with a
//! warning; loading never fails.
//!
//! The report is parsed by an explicit state machine over its lines
//! (`Idle -> SawHeader -> SawLink -> SawSeverity(optional) -> commit`); a
//! record only commits when the markers arrive in that order after a
//! header, and a marker in the wrong state resets the machine.

use crate::models::VulnRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const HEADER_PREFIX: &str = "=== ";
const HEADER_MARK: &str = " vulnerability published: ";
const HEADER_SUFFIX: &str = " ===";
const LINK_PREFIX: &str = "Link: ";
const CVSS_PREFIX: &str = "CVSS: ";
const SUMMARY_PREFIX: &str = "Summary: ";

/// Identifier-keyed map of every record a previous run saw for this
/// (target, logical date).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoricalState {
    records: BTreeMap<String, VulnRecord>,
}

impl HistoricalState {
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&VulnRecord> {
        self.records.get(id)
    }

    /// Union merge: the inserted record replaces any prior entry for its id.
    pub fn insert(&mut self, record: VulnRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<BTreeMap<String, VulnRecord>> for HistoricalState {
    fn from(records: BTreeMap<String, VulnRecord>) -> Self {
        Self { records }
    }
}

/// Report parser states. Field-carrying variants make the required marker
/// order explicit: a record needs header, link, optional severity, then
/// summary, in that order.
enum ReportState {
    Idle,
    SawHeader {
        published: String,
    },
    SawLink {
        published: String,
        id: String,
        link: String,
    },
    SawSeverity {
        published: String,
        id: String,
        link: String,
        cvss: String,
    },
}

/// Parse the human-readable report back into records.
///
/// Unknown lines (the block separators) leave the machine untouched;
/// recognized prefixes arriving out of order reset it to idle.
fn parse_report(text: &str) -> BTreeMap<String, VulnRecord> {
    let mut records = BTreeMap::new();
    let mut state = ReportState::Idle;

    for raw_line in text.lines() {
        let line = raw_line.trim();

        state = if line.starts_with(HEADER_PREFIX) && line.contains(HEADER_MARK) {
            // A header always starts a fresh record, discarding any partial one.
            let rest = line.split_once(HEADER_MARK).map(|(_, rest)| rest).unwrap_or("");
            let published = rest.strip_suffix(HEADER_SUFFIX).unwrap_or(rest).trim();
            ReportState::SawHeader {
                published: published.to_string(),
            }
        } else if let Some(link) = line.strip_prefix(LINK_PREFIX) {
            match state {
                ReportState::SawHeader { published } => {
                    let link = link.trim().to_string();
                    let id = link
                        .rsplit('/')
                        .next()
                        .filter(|id| !id.is_empty())
                        .map(str::to_string);
                    match id {
                        Some(id) => ReportState::SawLink {
                            published,
                            id,
                            link,
                        },
                        None => ReportState::Idle,
                    }
                }
                _ => ReportState::Idle,
            }
        } else if let Some(cvss) = line.strip_prefix(CVSS_PREFIX) {
            match state {
                ReportState::SawLink {
                    published,
                    id,
                    link,
                } => ReportState::SawSeverity {
                    published,
                    id,
                    link,
                    cvss: cvss.trim().to_string(),
                },
                _ => ReportState::Idle,
            }
        } else if let Some(summary) = line.strip_prefix(SUMMARY_PREFIX) {
            match state {
                ReportState::SawLink {
                    published,
                    id,
                    link,
                } => {
                    records.insert(
                        id.clone(),
                        VulnRecord {
                            id,
                            link,
                            published,
                            cvss: "N/A".to_string(),
                            summary: summary.trim().to_string(),
                        },
                    );
                    ReportState::Idle
                }
                ReportState::SawSeverity {
                    published,
                    id,
                    link,
                    cvss,
                } => {
                    records.insert(
                        id.clone(),
                        VulnRecord {
                            id,
                            link,
                            published,
                            cvss,
                            summary: summary.trim().to_string(),
                        },
                    );
                    ReportState::Idle
                }
                _ => ReportState::Idle,
            }
        } else {
            state
        };
    }

    records
}

/// Durable store for one (target, logical date) pair.
#[derive(Debug)]
pub struct HistoryStore {
    json_dir: PathBuf,
    report_dir: PathBuf,
    target: String,
    date_tag: String,
}

impl HistoryStore {
    pub fn new(
        json_dir: impl Into<PathBuf>,
        report_dir: impl Into<PathBuf>,
        target: &str,
        date_tag: &str,
    ) -> Self {
        Self {
            json_dir: json_dir.into(),
            report_dir: report_dir.into(),
            target: target.to_string(),
            date_tag: date_tag.to_string(),
        }
    }

    pub fn dump_path(&self) -> PathBuf {
        self.json_dir
            .join(format!("{}_vulns_{}.json", self.target, self.date_tag))
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_dir
            .join(format!("{}_report_{}.txt", self.target, self.date_tag))
    }

    /// Load prior state from both sources, dump winning per key.
    ///
    /// Never fails: a missing file contributes nothing, an unreadable one
    /// is logged and contributes nothing.
    pub async fn load(&self) -> HistoricalState {
        let mut records = BTreeMap::new();

        match read_optional(&self.report_path()).await {
            Ok(Some(text)) => records.extend(parse_report(&text)),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %self.report_path().display(), error = %e, "unreadable report; ignoring")
            }
        }

        match read_optional(&self.dump_path()).await {
            Ok(Some(text)) => match serde_json::from_str::<BTreeMap<String, VulnRecord>>(&text) {
                Ok(dump) => records.extend(dump),
                Err(e) => {
                    warn!(path = %self.dump_path().display(), error = %e, "malformed dump; ignoring")
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(path = %self.dump_path().display(), error = %e, "unreadable dump; ignoring")
            }
        }

        HistoricalState::from(records)
    }

    /// Overwrite the structured dump with the given union state.
    pub async fn save_dump(&self, state: &HistoricalState) -> Result<(), Box<dyn Error>> {
        fs::create_dir_all(&self.json_dir).await?;
        let json = serde_json::to_string_pretty(state)?;
        fs::write(self.dump_path(), json).await?;
        info!(path = %self.dump_path().display(), keys = state.len(), "wrote structured dump");
        Ok(())
    }

    /// Append one block per record to the report. Prior entries are never
    /// rewritten, and an empty record set touches no file at all.
    pub async fn append_report(&self, records: &[VulnRecord]) -> Result<(), Box<dyn Error>> {
        if records.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.report_dir).await?;

        let mut block = String::new();
        for record in records {
            writeln!(
                block,
                "{}{}{}{}{}",
                HEADER_PREFIX, self.target, HEADER_MARK, record.published, HEADER_SUFFIX
            )
            .unwrap();
            writeln!(block, "{}{}", LINK_PREFIX, record.link).unwrap();
            writeln!(block, "{}{}", CVSS_PREFIX, record.cvss).unwrap();
            // The report is line-oriented; fold any newlines out of the summary.
            writeln!(block, "{}{}", SUMMARY_PREFIX, record.summary.replace('\n', " ")).unwrap();
            writeln!(block, "{}", "-".repeat(80)).unwrap();
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.report_path())
            .await?;
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;
        info!(path = %self.report_path().display(), added = records.len(), "appended report entries");
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, std::io::Error> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
