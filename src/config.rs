//! Run configuration loaded from a YAML file.
//!
//! All tunables that were constants in earlier iterations of this tool
//! (retry count, delays, base URL, output folders) live in explicit config
//! structs passed into each component at construction, so tests can inject
//! fake endpoints and zero delays.
//!
//! # Example
//!
//! ```yaml
//! target: apache
//! query: apache struts
//! day_ago: 1
//! page: "1-3"
//! webhook_url: https://example.com/webhook
//! fetch:
//!   max_attempts: 3
//!   retry_delay_secs: 5
//! ```
//!
//! Missing or empty required fields, a negative `day_ago`, or an invalid
//! page range is a [`ConfigError`]: the process must refuse to start before
//! any network activity happens.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::ops::RangeInclusive;
use tokio::fs;

/// Rows per result page; `startIndex` advances in steps of this.
pub const PAGE_SIZE: u32 = 20;

static PAGE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$").unwrap());

/// Errors that abort startup before any page is fetched.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read at all.
    Unreadable { path: String, source: std::io::Error },
    /// The file is not valid YAML or is missing a required field.
    Invalid(serde_yaml::Error),
    /// A required field is present but empty.
    EmptyField(&'static str),
    /// `day_ago` must be zero or positive.
    BadDayOffset(i64),
    /// `page` must be `N` or `N-M` with `1 <= N <= M`.
    BadPageRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Unreadable { path, source } => {
                write!(f, "cannot read config file {path}: {source}")
            }
            ConfigError::Invalid(e) => write!(f, "invalid config file: {e}"),
            ConfigError::EmptyField(name) => {
                write!(f, "config field '{name}' must be non-empty")
            }
            ConfigError::BadDayOffset(n) => write!(f, "day_ago must be >= 0, got {n}"),
            ConfigError::BadPageRange(s) => {
                write!(f, "invalid page range '{s}': expected N or N-M with 1 <= N <= M")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Unreadable { source, .. } => Some(source),
            ConfigError::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

/// Page selection: a single page number or a `"start-end"` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PageSpec {
    Number(u32),
    Range(String),
}

impl Default for PageSpec {
    fn default() -> Self {
        PageSpec::Number(1)
    }
}

/// Fetcher tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Attempts per page before giving up on it.
    pub max_attempts: usize,
    /// Fixed sleep between attempts.
    pub retry_delay_secs: u64,
    /// Per-attempt request timeout.
    pub timeout_secs: u64,
    /// Pacing sleep before each page fetch.
    pub page_delay_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            timeout_secs: 15,
            page_delay_secs: 1,
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name labelling output files and alerts.
    pub target: String,
    /// Search query sent to the vulnerability database.
    pub query: String,
    /// Scan for records published after midnight this many days ago.
    #[serde(default)]
    pub day_ago: i64,
    #[serde(default)]
    pub page: PageSpec,
    /// Optional alert webhook; no notification is attempted without it.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Directory for the structured JSON dumps.
    #[serde(default = "default_json_dir")]
    pub json_dir: String,
    /// Directory for the human-readable reports.
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
    #[serde(default)]
    pub fetch: FetchConfig,
}

fn default_base_url() -> String {
    "https://nvd.nist.gov".to_string()
}

fn default_json_dir() -> String {
    "json".to_string()
}

fn default_report_dir() -> String {
    "result".to_string()
}

impl Config {
    /// Load and validate the configuration file.
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Unreadable {
                path: path.to_string(),
                source,
            })?;
        let config: Config = serde_yaml::from_str(&text).map_err(ConfigError::Invalid)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::EmptyField("target"));
        }
        if self.query.trim().is_empty() {
            return Err(ConfigError::EmptyField("query"));
        }
        if self.day_ago < 0 {
            return Err(ConfigError::BadDayOffset(self.day_ago));
        }
        self.page_range()?;
        Ok(())
    }

    /// The inclusive, 1-indexed page range for this run.
    pub fn page_range(&self) -> Result<RangeInclusive<u32>, ConfigError> {
        match &self.page {
            PageSpec::Number(n) if *n >= 1 => Ok(*n..=*n),
            PageSpec::Number(n) => Err(ConfigError::BadPageRange(n.to_string())),
            PageSpec::Range(s) => {
                let caps = PAGE_RANGE_RE
                    .captures(s)
                    .ok_or_else(|| ConfigError::BadPageRange(s.clone()))?;
                let start: u32 = caps[1]
                    .parse()
                    .map_err(|_| ConfigError::BadPageRange(s.clone()))?;
                let end: u32 = match caps.get(2) {
                    Some(m) => m
                        .as_str()
                        .parse()
                        .map_err(|_| ConfigError::BadPageRange(s.clone()))?,
                    None => start,
                };
                if start < 1 || end < start {
                    return Err(ConfigError::BadPageRange(s.clone()));
                }
                Ok(start..=end)
            }
        }
    }

    /// Search URL for one page, with the query percent-encoded.
    pub fn search_url(&self, start_index: u32) -> String {
        format!(
            "{}/vuln/search/results?query={}&startIndex={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.query),
            start_index
        )
    }
}
