//! The scrape-dedup-persist pipeline.
//!
//! One call to [`run`] is one complete scan: compute the publication
//! window, load historical state, walk the configured pages sequentially,
//! aggregate in-window records, decide what is genuinely new, persist, and
//! notify at most once.
//!
//! # Failure containment
//!
//! Page-level failures (retries exhausted) and row-level failures are
//! logged and skipped; persistence and notification failures are logged
//! and the run continues. Only configuration problems and genuinely
//! unexpected errors abort a run. Re-running with identical inputs on the
//! same day reproduces the same dump (a union) and sends no duplicate
//! notifications.
//!
//! Pages are processed strictly sequentially with a pacing delay between
//! fetches; all file writes happen once, after the last page.

use crate::config::{Config, PAGE_SIZE};
use crate::dedup;
use crate::extract;
use crate::fetch::FetchPage;
use crate::history::HistoryStore;
use crate::models::{RunWindow, VulnRecord};
use crate::notify::{AlertMessage, AlertSink};
use crate::utils::truncate_for_log;
use itertools::Itertools;
use std::error::Error;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// What one run produced: everything in-window, and the subset never seen
/// before this run.
#[derive(Debug, Default)]
pub struct RunResult {
    pub all_in_window: Vec<VulnRecord>,
    pub newly_unseen: Vec<VulnRecord>,
}

/// Execute one scan against the configured target.
#[instrument(level = "info", skip_all, fields(target = %config.target))]
pub async fn run<F, S>(
    config: &Config,
    fetcher: &F,
    sink: Option<&S>,
) -> Result<RunResult, Box<dyn Error>>
where
    F: FetchPage,
    S: AlertSink,
{
    let window = RunWindow::from_day_offset(config.day_ago);
    let pages = config.page_range()?;
    info!(
        target = %config.target,
        query = %config.query,
        day_ago = config.day_ago,
        pages = ?pages,
        boundary = %window.boundary,
        "starting scan"
    );

    let store = HistoryStore::new(
        &config.json_dir,
        &config.report_dir,
        &config.target,
        &window.date_tag(),
    );
    let history = store.load().await;
    if history.is_empty() {
        info!("no prior state for this date");
    } else {
        info!(known = history.len(), "loaded historical state");
    }

    let mut aggregate: Vec<VulnRecord> = Vec::new();
    for page in pages {
        let start_index = (page - 1) * PAGE_SIZE;
        let url = config.search_url(start_index);
        info!(page, start_index, "scanning page");
        sleep(Duration::from_secs(config.fetch.page_delay_secs)).await;

        let body = match fetcher.fetch(&url).await {
            Ok(body) => body,
            Err(e) => {
                // Non-fatal: the page is lost, the run goes on.
                warn!(page, start_index, error = %e, "page fetch failed; skipping page");
                continue;
            }
        };

        let records = extract::extract_records(&body, &config.base_url);
        if records.is_empty() {
            info!(page, "page yielded no vulnerability rows");
            continue;
        }

        let extracted = records.len();
        let kept = dedup::in_window(records, &window.boundary);
        debug!(page, extracted, in_window = kept.len(), "extracted page");
        aggregate.extend(kept);
    }

    // The same CVE can surface on two pages when the listing shifts mid-run.
    let aggregate: Vec<VulnRecord> = aggregate
        .into_iter()
        .unique_by(|record| record.id.clone())
        .collect();
    let newly_unseen = dedup::unseen(&aggregate, &history);

    if aggregate.is_empty() {
        info!(boundary = %window.boundary, "no vulnerabilities published after the boundary");
        return Ok(RunResult::default());
    }

    info!(
        in_window = aggregate.len(),
        new = newly_unseen.len(),
        "scan aggregated"
    );
    for record in &newly_unseen {
        info!(
            id = %record.id,
            link = %record.link,
            published = %record.published,
            cvss = %record.cvss,
            summary = %truncate_for_log(&record.summary, 500),
            "new vulnerability"
        );
    }

    // Historical state accumulates every in-window record ever seen, not
    // just the novel ones, so same-day re-runs converge on the same file.
    let mut merged = history;
    for record in &aggregate {
        merged.insert(record.clone());
    }
    if let Err(e) = store.save_dump(&merged).await {
        error!(error = %e, "failed to write structured dump; continuing");
    }
    if let Err(e) = store.append_report(&newly_unseen).await {
        error!(error = %e, "failed to append report; continuing");
    }

    if !newly_unseen.is_empty() {
        if let Some(sink) = sink {
            let message = AlertMessage {
                target: &config.target,
                boundary: window.boundary,
                records: &newly_unseen,
            };
            match sink.notify(&message).await {
                Ok(()) => info!(count = newly_unseen.len(), "alert delivered"),
                Err(e) => warn!(error = %e, "alert delivery failed"),
            }
        }
    }

    Ok(RunResult {
        all_in_window: aggregate,
        newly_unseen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, PageSpec};
    use crate::fetch::RetryFetch;
    use crate::history::HistoricalState;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};

    const IN_WINDOW: &str = "January 01, 2099; 09:00:00 AM +0000";
    const OUT_OF_WINDOW: &str = "January 01, 1999; 09:00:00 AM +0000";
    const EMPTY_PAGE: &str = "<html><body><table></table></body></html>";

    // Cell wrapper keeps html5ever from foster-parenting the markers out
    // of the table.
    fn vuln_row(id: &str, published: &str) -> String {
        format!(
            r#"<tr data-testid="vuln-row-{id}"><td>
                 <a data-testid="vuln-detail-link-{id}" href="/vuln/detail/{id}">{id}</a>
                 <span data-testid="vuln-published-on-{id}">{published}</span>
                 <p data-testid="vuln-summary-{id}">Summary of {id}.</p>
                 <a data-testid="vuln-cvss3-link-{id}" class="label label-danger">9.8</a>
               </td></tr>"#
        )
    }

    fn result_page(rows: &[String]) -> String {
        format!(
            "<html><body><table><tbody>{}</tbody></table></body></html>",
            rows.concat()
        )
    }

    /// Serves canned bodies keyed by startIndex and counts attempts per page.
    struct FakeFetcher {
        pages: HashMap<u32, Result<String, String>>,
        attempts: Arc<Mutex<HashMap<u32, usize>>>,
    }

    impl FakeFetcher {
        fn new(pages: HashMap<u32, Result<String, String>>) -> Self {
            Self {
                pages,
                attempts: Arc::new(Mutex::new(HashMap::new())),
            }
        }
    }

    impl FetchPage for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>> {
            let start_index: u32 = url
                .split("startIndex=")
                .nth(1)
                .expect("search URL always carries startIndex")
                .parse()
                .unwrap();
            *self.attempts.lock().unwrap().entry(start_index).or_insert(0) += 1;
            match self.pages.get(&start_index) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(message)) => Err(message.clone().into()),
                None => Ok(EMPTY_PAGE.to_string()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl AlertSink for RecordingSink {
        async fn notify(&self, message: &AlertMessage<'_>) -> Result<(), Box<dyn Error>> {
            let ids = message.records.iter().map(|r| r.id.clone()).collect();
            self.calls.lock().unwrap().push(ids);
            Ok(())
        }
    }

    fn test_config(tag: &str, page: PageSpec) -> Config {
        let root = std::env::temp_dir().join(format!(
            "nvd_watch_pipeline_{}_{}",
            std::process::id(),
            tag
        ));
        let _ = std::fs::remove_dir_all(&root);
        Config {
            target: "apache".to_string(),
            query: "apache struts".to_string(),
            day_ago: 0,
            page,
            webhook_url: None,
            base_url: "https://nvd.nist.gov".to_string(),
            json_dir: root.join("json").to_string_lossy().into_owned(),
            report_dir: root.join("result").to_string_lossy().into_owned(),
            fetch: FetchConfig {
                max_attempts: 3,
                retry_delay_secs: 0,
                timeout_secs: 15,
                page_delay_secs: 0,
            },
        }
    }

    fn dump_keys(config: &Config) -> Vec<String> {
        let store = HistoryStore::new(
            &config.json_dir,
            &config.report_dir,
            &config.target,
            &RunWindow::from_day_offset(config.day_ago).date_tag(),
        );
        let text = std::fs::read_to_string(store.dump_path()).unwrap();
        let dump: BTreeMap<String, VulnRecord> = serde_json::from_str(&text).unwrap();
        dump.into_keys().collect()
    }

    fn report_text(config: &Config) -> String {
        let store = HistoryStore::new(
            &config.json_dir,
            &config.report_dir,
            &config.target,
            &RunWindow::from_day_offset(config.day_ago).date_tag(),
        );
        std::fs::read_to_string(store.report_path()).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_run_aggregates_persists_and_notifies() {
        let config = test_config("fresh", PageSpec::Number(1));
        let fetcher = FakeFetcher::new(HashMap::from([(
            0,
            Ok(result_page(&[
                vuln_row("CVE-2099-0001", IN_WINDOW),
                vuln_row("CVE-2099-0002", IN_WINDOW),
            ])),
        )]));
        let sink = RecordingSink::default();

        let result = run(&config, &fetcher, Some(&sink)).await.unwrap();

        assert_eq!(result.all_in_window.len(), 2);
        assert_eq!(result.newly_unseen.len(), 2);
        assert_eq!(dump_keys(&config), vec!["CVE-2099-0001", "CVE-2099-0002"]);

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["CVE-2099-0001", "CVE-2099-0002"]);
    }

    #[tokio::test]
    async fn test_repeat_run_same_day_sends_nothing_new() {
        let config = test_config("repeat", PageSpec::Number(1));
        let pages = HashMap::from([(
            0,
            Ok(result_page(&[
                vuln_row("CVE-2099-0001", IN_WINDOW),
                vuln_row("CVE-2099-0002", IN_WINDOW),
            ])),
        )]);
        let sink = RecordingSink::default();

        let first = run(&config, &FakeFetcher::new(pages.clone()), Some(&sink))
            .await
            .unwrap();
        assert_eq!(first.newly_unseen.len(), 2);
        let report_after_first = report_text(&config);

        let second = run(&config, &FakeFetcher::new(pages), Some(&sink))
            .await
            .unwrap();

        assert_eq!(second.all_in_window.len(), 2);
        assert!(second.newly_unseen.is_empty());
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
        assert_eq!(report_text(&config), report_after_first);
        assert_eq!(dump_keys(&config), vec!["CVE-2099-0001", "CVE-2099-0002"]);
    }

    #[tokio::test]
    async fn test_exhausted_page_skips_without_killing_the_run() {
        let config = test_config("exhausted", PageSpec::Range("1-3".to_string()));
        let fake = FakeFetcher::new(HashMap::from([
            (0, Ok(result_page(&[vuln_row("CVE-2099-0001", IN_WINDOW)]))),
            (20, Err("connection reset".to_string())),
            (40, Ok(result_page(&[vuln_row("CVE-2099-0003", IN_WINDOW)]))),
        ]));
        let attempts = Arc::clone(&fake.attempts);
        let fetcher = RetryFetch::new(fake, &config.fetch);
        let sink = RecordingSink::default();

        let result = run(&config, &fetcher, Some(&sink)).await.unwrap();

        let ids: Vec<&str> = result.all_in_window.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["CVE-2099-0001", "CVE-2099-0003"]);
        assert_eq!(attempts.lock().unwrap()[&20], 3);
    }

    #[tokio::test]
    async fn test_out_of_window_records_are_dropped_during_extraction() {
        let config = test_config("window", PageSpec::Number(1));
        let fetcher = FakeFetcher::new(HashMap::from([(
            0,
            Ok(result_page(&[
                vuln_row("CVE-2099-0001", IN_WINDOW),
                vuln_row("CVE-1999-0001", OUT_OF_WINDOW),
            ])),
        )]));

        let result = run(&config, &fetcher, None::<&RecordingSink>).await.unwrap();

        assert_eq!(result.all_in_window.len(), 1);
        assert_eq!(result.all_in_window[0].id, "CVE-2099-0001");
        assert_eq!(dump_keys(&config), vec!["CVE-2099-0001"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_across_pages_is_aggregated_once() {
        let config = test_config("dup", PageSpec::Range("1-2".to_string()));
        let fetcher = FakeFetcher::new(HashMap::from([
            (0, Ok(result_page(&[vuln_row("CVE-2099-0001", IN_WINDOW)]))),
            (20, Ok(result_page(&[vuln_row("CVE-2099-0001", IN_WINDOW)]))),
        ]));

        let result = run(&config, &fetcher, None::<&RecordingSink>).await.unwrap();

        assert_eq!(result.all_in_window.len(), 1);
        assert_eq!(result.newly_unseen.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_run_creates_no_files() {
        let config = test_config("empty", PageSpec::Number(1));
        let fetcher = FakeFetcher::new(HashMap::new());
        let sink = RecordingSink::default();

        let result = run(&config, &fetcher, Some(&sink)).await.unwrap();

        assert!(result.all_in_window.is_empty());
        assert!(result.newly_unseen.is_empty());
        assert!(!std::path::Path::new(&config.json_dir).exists());
        assert!(!std::path::Path::new(&config.report_dir).exists());
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_known_records_are_persisted_but_not_notified() {
        let config = test_config("known", PageSpec::Number(1));

        // Seed history as if a previous run already saw one of the two.
        let store = HistoryStore::new(
            &config.json_dir,
            &config.report_dir,
            &config.target,
            &RunWindow::from_day_offset(0).date_tag(),
        );
        let mut seeded = HistoricalState::default();
        seeded.insert(VulnRecord {
            id: "CVE-2099-0001".to_string(),
            link: "https://nvd.nist.gov/vuln/detail/CVE-2099-0001".to_string(),
            published: IN_WINDOW.to_string(),
            cvss: "V3.x: 9.8 HIGH".to_string(),
            summary: "Summary of CVE-2099-0001.".to_string(),
        });
        store.save_dump(&seeded).await.unwrap();

        let fetcher = FakeFetcher::new(HashMap::from([(
            0,
            Ok(result_page(&[
                vuln_row("CVE-2099-0001", IN_WINDOW),
                vuln_row("CVE-2099-0002", IN_WINDOW),
            ])),
        )]));
        let sink = RecordingSink::default();

        let result = run(&config, &fetcher, Some(&sink)).await.unwrap();

        assert_eq!(result.all_in_window.len(), 2);
        assert_eq!(result.newly_unseen.len(), 1);
        assert_eq!(result.newly_unseen[0].id, "CVE-2099-0002");
        assert_eq!(dump_keys(&config), vec!["CVE-2099-0001", "CVE-2099-0002"]);

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["CVE-2099-0002"]);
    }
}
