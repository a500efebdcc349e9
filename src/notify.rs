//! Alert delivery for newly discovered vulnerabilities.
//!
//! [`AlertSink`] abstracts the transport so the orchestrator (and its
//! tests) never care where alerts land. The shipped implementation,
//! [`WebhookSink`], POSTs a markdown payload to a configured webhook URL:
//!
//! ```json
//! {"msgtype": "markdown", "markdown": {"content": "..."}}
//! ```
//!
//! Delivery failures are reported to the caller as errors and are never
//! fatal to a run.

use crate::models::VulnRecord;
use chrono::{DateTime, FixedOffset, Local};
use std::error::Error;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::info;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// One run's alert: the target, the window it scanned, and what was new.
#[derive(Debug)]
pub struct AlertMessage<'a> {
    pub target: &'a str,
    pub boundary: DateTime<FixedOffset>,
    pub records: &'a [VulnRecord],
}

/// Transport for delivering one alert per run.
pub trait AlertSink {
    async fn notify(&self, message: &AlertMessage<'_>) -> Result<(), Box<dyn Error>>;
}

/// Webhook-backed sink with a bounded delivery timeout.
#[derive(Debug)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, Box<dyn Error>> {
        let client = reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl AlertSink for WebhookSink {
    async fn notify(&self, message: &AlertMessage<'_>) -> Result<(), Box<dyn Error>> {
        let payload = serde_json::json!({
            "msgtype": "markdown",
            "markdown": { "content": render_markdown(message) },
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("webhook returned {status}: {body}").into());
        }
        info!(count = message.records.len(), "alert webhook accepted the message");
        Ok(())
    }
}

/// Markdown body listing every new record with id, severity, published
/// instant, and detail link.
fn render_markdown(message: &AlertMessage<'_>) -> String {
    let mut content = String::new();
    writeln!(content, "**{} NVD vulnerability report**", message.target).unwrap();
    writeln!(
        content,
        "Scanned at: {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
    .unwrap();
    writeln!(
        content,
        "Found {} new vulnerabilities published after {}:",
        message.records.len(),
        message.boundary.format("%Y-%m-%d")
    )
    .unwrap();

    for (index, record) in message.records.iter().enumerate() {
        writeln!(content).unwrap();
        writeln!(content, "{}. **{}** (CVSS: {})", index + 1, record.id, record.cvss).unwrap();
        writeln!(content, "Published: {}", record.published).unwrap();
        writeln!(content, "[details]({})", record.link).unwrap();
    }
    content
}
