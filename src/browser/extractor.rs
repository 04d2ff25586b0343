use super::{xpath_literal, Action, Locator, PageDriver, SelectorCascade, TextTarget};
use crate::config::BrowserConfig;
use crate::error::ScrapeError;
use crate::models::{Outcome, RawResultSet, Row, Strategy};
use crate::scraper::normalizer::normalize_raw;
use crate::scraper::parsers::{extract_table, TABLE_SELECTORS};
use crate::utils::wait_until;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Timings ───────────────────────────────────────────────────────────────────

/// Bounded waits used by the state machine.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Upper bound on waiting for the page to render after navigation.
    pub settle: Duration,
    /// Upper bound on waiting for result rows after the scan runs.
    pub scan_settle: Duration,
    /// Per-candidate timeout inside a cascade.
    pub step: Duration,
    pub table: Duration,
    pub poll: Duration,
}

impl From<&BrowserConfig> for Timings {
    fn from(cfg: &BrowserConfig) -> Self {
        Self {
            settle: Duration::from_millis(cfg.settle_ms),
            scan_settle: Duration::from_millis(cfg.scan_settle_ms),
            step: Duration::from_millis(cfg.step_timeout_ms),
            table: Duration::from_millis(cfg.table_timeout_ms),
            poll: Duration::from_millis(cfg.poll_ms),
        }
    }
}

impl Timings {
    /// Every wait is a single check.
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            scan_settle: Duration::ZERO,
            step: Duration::ZERO,
            table: Duration::ZERO,
            poll: Duration::from_millis(1),
        }
    }
}

// ── Filter change ─────────────────────────────────────────────────────────────

/// Switch the page's universe filter before running the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChange {
    /// Label of the option to pick, e.g. "Nifty 100".
    pub option_label: String,
    /// Label currently shown on the dropdown, e.g. "Future".
    pub current_label: String,
    /// Replacement text for the free-text filter field.
    pub filter_text: String,
}

impl FilterChange {
    pub fn segment(option_label: &str) -> Self {
        Self {
            option_label: option_label.to_string(),
            current_label: "Future".to_string(),
            filter_text: format!(
                "Stock passes all of the below filters in {} segment:",
                option_label.to_lowercase()
            ),
        }
    }

    fn option_locators(&self) -> Vec<Locator> {
        let label = &self.option_label;
        let upper = label.to_uppercase();
        let compact: String = label.split_whitespace().collect();
        let mut out = Vec::new();
        for tag in ["button", "option", "span", "a"] {
            out.push(contains_text(tag, label));
        }
        out.push(contains_text("button", &upper));
        out.push(contains_text("option", &upper));
        if compact != *label {
            out.push(contains_text("button", &compact));
        }
        out
    }

    fn trigger_locators(&self) -> Vec<Locator> {
        let current = &self.current_label;
        vec![
            contains_text("button", current),
            contains_text("button", &current.to_uppercase()),
            Locator::xpath("//select[contains(@class, 'segment')]"),
            Locator::xpath("//div[contains(@class, 'segment')]//button"),
            contains_text("span", current),
            contains_text("a", current),
        ]
    }

    fn text_target(&self) -> TextTarget {
        let mut hints = vec![self.current_label.to_lowercase(), "segment".to_string()];
        if let Some(first) = self.option_label.split_whitespace().next() {
            hints.push(first.to_lowercase());
        }
        TextTarget { hints, min_len: 10 }
    }
}

fn contains_text(tag: &str, text: &str) -> Locator {
    Locator::xpath(format!("//{}[contains(text(), {})]", tag, xpath_literal(text)))
}

const TEXT_FIELDS: &[&str] = &[
    "//textarea[contains(@placeholder, 'Scan')]",
    "//textarea[contains(@placeholder, 'filter')]",
    "//div[contains(@class, 'filter')]//textarea",
    "//div[contains(@class, 'magic')]//textarea",
    "//textarea",
    "//input[@type='text']",
    "//div[@contenteditable='true']",
];

const EXPORT_CONTROLS: &[&str] = &[
    "//button[contains(text(), 'CSV')]",
    "//button[contains(text(), 'Excel')]",
    "//a[contains(text(), 'CSV')]",
    "//a[contains(text(), 'Excel')]",
    "//button[contains(@class, 'csv')]",
    "//button[contains(@class, 'excel')]",
];

/// Results have rendered once the table has a body row.
const RESULT_ROWS: &str = "table tbody tr";

fn filter_cascade(change: &FilterChange, t: &Timings) -> SelectorCascade {
    SelectorCascade::new("filter", t.poll)
        .with_all(change.option_locators(), Action::Click, t.step)
        .with_all(
            change.trigger_locators(),
            Action::OpenThenSelect {
                options: change.option_locators(),
                option_timeout: t.step,
            },
            t.step,
        )
        .with_all(
            TEXT_FIELDS.iter().map(|x| Locator::xpath(*x)),
            Action::ReplaceText {
                text: change.filter_text.clone(),
                target: change.text_target(),
            },
            t.step,
        )
}

fn run_scan_cascade(t: &Timings) -> SelectorCascade {
    let labels = ["Run Scan", "RUN SCAN", "Run scan"];
    SelectorCascade::new("run-scan", t.poll)
        .with_all(labels.map(|l| contains_text("button", l)), Action::Click, t.step)
        .with_all(
            [
                Locator::xpath("//button[contains(@class, 'run-scan')]"),
                Locator::xpath("//button[contains(@class, 'btn-run')]"),
                Locator::xpath("//button[.//span[contains(text(), 'Run Scan')]]"),
            ],
            Action::Click,
            t.step,
        )
}

fn export_cascade(t: &Timings) -> SelectorCascade {
    SelectorCascade::new("export", t.poll).with_all(
        EXPORT_CONTROLS.iter().map(|x| Locator::xpath(*x)),
        Action::Present,
        t.step,
    )
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    NotLoaded,
    Loaded,
    FilterApplied,
    ScanRun,
    TableLocated,
    RowsExtracted,
    ExportFallback,
    StrategyExhausted,
}

impl fmt::Display for ExtractorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Drives one scan page through navigation, filtering, scanning and table
/// harvesting.
pub struct BrowserExtractor {
    driver: Box<dyn PageDriver>,
    timings: Timings,
    state: ExtractorState,
    history: Vec<ExtractorState>,
}

impl BrowserExtractor {
    pub fn new(driver: Box<dyn PageDriver>, timings: Timings) -> Self {
        Self {
            driver,
            timings,
            state: ExtractorState::NotLoaded,
            history: vec![ExtractorState::NotLoaded],
        }
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    /// Every state visited during the last `extract` call.
    pub fn history(&self) -> &[ExtractorState] {
        &self.history
    }

    fn enter(&mut self, next: ExtractorState) {
        debug!("Extractor {} → {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run the full state machine. Never errors: failures end in
    /// `StrategyExhausted`.
    pub async fn extract(&mut self, page_url: &str, filter: Option<&FilterChange>) -> Outcome {
        self.state = ExtractorState::NotLoaded;
        self.history = vec![ExtractorState::NotLoaded];

        match self.harvest(page_url, filter).await {
            Ok(rows) => {
                info!("Browser extracted {} rows", rows.len());
                return Outcome::Success(rows);
            }
            Err(e) => warn!("Browser path failed while {}: {}", self.state, e),
        }
        self.export_fallback().await
    }

    async fn harvest(
        &mut self,
        page_url: &str,
        filter: Option<&FilterChange>,
    ) -> Result<Vec<Row>, ScrapeError> {
        let t = self.timings;
        let table = Locator::css("table");

        info!("Loading {}", page_url);
        self.driver.goto(page_url).await?;
        let driver = self.driver.as_ref();
        wait_until(t.settle, t.poll, || driver.is_present(&table)).await?;
        self.enter(ExtractorState::Loaded);

        if let Some(change) = filter {
            let cascade = filter_cascade(change, &t);
            let applied = cascade.run(self.driver.as_ref()).await?.is_some();
            if applied {
                info!("Filter set to {}", change.option_label);
                self.enter(ExtractorState::FilterApplied);
            } else {
                warn!(
                    "Could not switch filter to {}, keeping page default",
                    change.option_label
                );
            }
        }

        let run_scan = run_scan_cascade(&t);
        if run_scan.run(self.driver.as_ref()).await?.is_none() {
            warn!("{}: no control found, results may already be shown", run_scan.name());
        }
        let driver = self.driver.as_ref();
        let rows_ready = Locator::css(RESULT_ROWS);
        wait_until(t.scan_settle, t.poll, || driver.is_present(&rows_ready)).await?;
        self.enter(ExtractorState::ScanRun);

        let driver = self.driver.as_ref();
        if !wait_until(t.table, t.poll, || driver.is_present(&table)).await? {
            return Err(ScrapeError::ElementNotFound("results table".into()));
        }
        let html = self.driver.content().await?;
        let scrape = extract_table(&html, TABLE_SELECTORS);
        if !scrape.found() {
            return Err(ScrapeError::ElementNotFound("results table".into()));
        }
        self.enter(ExtractorState::TableLocated);
        info!(
            "Table via {:?}: {} headers, {} raw rows",
            scrape.selector,
            scrape.headers.len(),
            scrape.raw_row_count
        );

        let rows = normalize_raw(RawResultSet::Table(scrape.rows));
        if rows.is_empty() {
            return Err(ScrapeError::ElementNotFound("table rows".into()));
        }
        self.enter(ExtractorState::RowsExtracted);
        Ok(rows)
    }

    /// Look for an export control as a last signal. Nothing is downloaded,
    /// so this always ends the chain.
    async fn export_fallback(&mut self) -> Outcome {
        self.enter(ExtractorState::ExportFallback);
        let export = export_cascade(&self.timings);
        match export.run(self.driver.as_ref()).await {
            Ok(Some(control)) => info!("Export control available ({}), not downloading", control),
            Ok(None) => info!("{}: no control found", export.name()),
            Err(e) => warn!("{}: lookup failed: {}", export.name(), e),
        }
        self.enter(ExtractorState::StrategyExhausted);
        Outcome::StrategyExhausted(vec![Strategy::BrowserTable, Strategy::ExportButton])
    }

    pub async fn close(&self) {
        if let Err(e) = self.driver.close().await {
            debug!("Driver close failed: {}", e);
        }
    }
}
