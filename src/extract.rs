//! Vulnerability record extraction from search result pages.
//!
//! The result site marks every interesting element with a `data-testid`
//! attribute whose value carries a row-specific suffix, so all queries here
//! are CSS attribute-prefix matches (`[data-testid^="..."]`) built once and
//! cached.
//!
//! A row missing its required markers (published date and detail link)
//! produces no record and no noise, and a row that fails to parse is
//! logged and skipped without aborting the page.

use crate::models::{parse_published, VulnRecord, PUBLISHED_FORMAT};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

/// Selector matching `tag[data-testid^="prefix"]`.
fn testid_prefix(tag: &str, prefix: &str) -> Selector {
    Selector::parse(&format!(r#"{tag}[data-testid^="{prefix}"]"#)).unwrap()
}

static ROW: Lazy<Selector> = Lazy::new(|| testid_prefix("tr", "vuln-row-"));
static PUBLISHED: Lazy<Selector> = Lazy::new(|| testid_prefix("span", "vuln-published-on-"));
static DETAIL_LINK: Lazy<Selector> = Lazy::new(|| testid_prefix("a", "vuln-detail-link-"));
static SUMMARY: Lazy<Selector> = Lazy::new(|| testid_prefix("p", "vuln-summary-"));
static CVSS3: Lazy<Selector> = Lazy::new(|| testid_prefix("a", "vuln-cvss3-link-"));
static CVSS2: Lazy<Selector> = Lazy::new(|| testid_prefix("span", "vuln-cvss2-na-"));

/// Extract all vulnerability records from one result page.
///
/// Returns zero or more records; rows that are incomplete or unparseable
/// are skipped. The caller distinguishes "empty page" from "fetch failed".
pub fn extract_records(body: &str, base_url: &str) -> Vec<VulnRecord> {
    let base = match Url::parse(base_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(base_url, error = %e, "unusable base URL; skipping page");
            return Vec::new();
        }
    };

    let document = Html::parse_document(body);
    document
        .select(&ROW)
        .filter_map(|row| parse_row(&row, &base))
        .collect()
}

/// Parse one row into a record.
///
/// A row without both required markers (published date and detail link)
/// yields `None` silently; any other defect is logged before skipping.
fn parse_row(row: &ElementRef<'_>, base: &Url) -> Option<VulnRecord> {
    let published_el = row.select(&PUBLISHED).next()?;
    let link_el = row.select(&DETAIL_LINK).next()?;

    let raw_published = element_text(&published_el);
    let published = match parse_published(&raw_published) {
        Some(instant) => instant.format(PUBLISHED_FORMAT).to_string(),
        None => {
            warn!(text = %raw_published, "unparseable published date; skipping row");
            return None;
        }
    };

    let id = element_text(&link_el);
    if id.is_empty() {
        warn!("detail link carries no identifier text; skipping row");
        return None;
    }

    let href = link_el.value().attr("href").unwrap_or_default();
    let link = match base.join(href) {
        Ok(url) => url.to_string(),
        Err(e) => {
            warn!(%id, href, error = %e, "unresolvable detail link; skipping row");
            return None;
        }
    };

    let summary = row
        .select(&SUMMARY)
        .next()
        .map(|el| element_text(&el))
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| "N/A".to_string());

    Some(VulnRecord {
        id,
        link,
        published,
        cvss: extract_cvss(row),
        summary,
    })
}

/// Severity label with v3.x precedence over v2.0.
///
/// A v3.x marker always wins: its score is combined with the tier implied
/// by the label class. A v2.0 marker is consulted only when no v3.x marker
/// exists and its text does not say the score is unavailable.
fn extract_cvss(row: &ElementRef<'_>) -> String {
    if let Some(v3) = row.select(&CVSS3).next() {
        let score = element_text(&v3);
        let severity = if has_class(&v3, "label-danger") {
            "HIGH"
        } else if has_class(&v3, "label-warning") {
            "MEDIUM"
        } else if has_class(&v3, "label-low") {
            "LOW"
        } else {
            ""
        };
        return format!("V3.x: {score} {severity}").trim_end().to_string();
    }

    if let Some(v2) = row.select(&CVSS2).next() {
        let text = element_text(&v2);
        if !text.contains("(not available)") {
            if let Some(score) = text.split(':').nth(1) {
                return format!("V2.0: {}", score.trim());
            }
        }
    }

    "N/A".to_string()
}

fn has_class(element: &ElementRef<'_>, name: &str) -> bool {
    element.value().classes().any(|class| class == name)
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}
