use super::segment_label;
use crate::browser::{BrowserExtractor, BrowserLauncher, FilterChange, Timings};
use crate::error::ScrapeError;
use crate::models::{Credential, Outcome, Row, ScanQuery, Strategy};
use crate::scraper::{QueryExecutor, SessionContext, TokenProvider};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One scan to acquire: the clause for the API and the page the browser
/// (and the token) come from.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub query: ScanQuery,
    pub page_url: String,
    pub filter: Option<FilterChange>,
}

impl QuerySpec {
    pub fn new(query: ScanQuery, page_url: impl Into<String>) -> Self {
        Self {
            query,
            page_url: page_url.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterChange) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Pick the clause's own `{segment}` on the page, unless a filter is set.
    pub fn with_segment_filter(self) -> Self {
        if self.filter.is_some() {
            return self;
        }
        let label = self.query.segment().map(segment_label);
        match label {
            Some(label) => self.with_filter(FilterChange::segment(&label)),
            None => self,
        }
    }
}

/// Rows plus how each strategy fared, for logging.
#[derive(Debug, Default)]
pub struct Extraction {
    pub rows: Vec<Row>,
    pub source: Option<Strategy>,
    pub attempts: Vec<(Strategy, String)>,
    tried: Vec<Strategy>,
}

impl Extraction {
    fn record(&mut self, strategy: Strategy, outcome: &Outcome) {
        self.attempts.push((strategy, outcome.summary()));
        let nested: &[Strategy] = match outcome {
            Outcome::StrategyExhausted(inner) => inner,
            _ => &[],
        };
        for s in std::iter::once(&strategy).chain(nested) {
            if !self.tried.contains(s) {
                self.tried.push(*s);
            }
        }
    }

    /// Every strategy that ran, when none of them produced rows.
    pub fn failure(&self) -> Option<ScrapeError> {
        if !self.rows.is_empty() || self.tried.is_empty() {
            return None;
        }
        Some(ScrapeError::StrategyExhausted(self.tried.clone()))
    }

    pub fn describe(&self) -> String {
        self.attempts
            .iter()
            .map(|(s, o)| format!("{}: {}", s, o))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// API first, browser second. Owns the session; the browser is only started
/// the first time the API path comes back without rows.
pub struct Coordinator {
    ctx: SessionContext,
    tokens: TokenProvider,
    executor: QueryExecutor,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    timings: Timings,
    extractor: Mutex<Option<BrowserExtractor>>,
}

impl Coordinator {
    pub fn new(
        ctx: SessionContext,
        launcher: Option<Arc<dyn BrowserLauncher>>,
        timings: Timings,
    ) -> Self {
        let tokens = TokenProvider::new();
        let executor = QueryExecutor::new(ctx.config().process_url(), tokens);
        Self {
            ctx,
            tokens,
            executor,
            launcher,
            timings,
            extractor: Mutex::new(None),
        }
    }

    /// Rows for `spec`, possibly empty. Never errors.
    pub async fn run(&self, spec: &QuerySpec) -> Vec<Row> {
        self.run_detailed(spec).await.rows
    }

    pub async fn run_detailed(&self, spec: &QuerySpec) -> Extraction {
        let mut report = Extraction::default();

        let api = self.try_api(spec).await;
        report.record(Strategy::Api, &api);
        if api.is_success() {
            info!("API returned data for {}", spec.query);
            report.source = Some(Strategy::Api);
            report.rows = api.into_rows();
            return report;
        }

        match &self.launcher {
            Some(launcher) => {
                info!("API path gave {}, escalating to browser", api.summary());
                let browser = self.try_browser(launcher.as_ref(), spec).await;
                report.record(Strategy::BrowserTable, &browser);
                if browser.is_success() {
                    report.source = Some(Strategy::BrowserTable);
                    report.rows = browser.into_rows();
                    return report;
                }
            }
            None => debug!("API path gave {}, no browser configured", api.summary()),
        }

        if let Some(err) = report.failure() {
            warn!("No data for {}: {} ({})", spec.query, err, report.describe());
        }
        report
    }

    async fn credential(&self, page_url: &str) -> Result<Credential, Outcome> {
        if let Some(cred) = self.ctx.fresh_credential() {
            debug!("Reusing token {}", cred.preview());
            return Ok(cred);
        }
        self.tokens
            .acquire(&self.ctx, page_url)
            .await
            .map_err(Outcome::Fatal)
    }

    async fn try_api(&self, spec: &QuerySpec) -> Outcome {
        let credential = match self.credential(&spec.page_url).await {
            Ok(c) => c,
            Err(outcome) => return outcome,
        };
        self.executor.execute(&spec.query, &credential, &self.ctx).await
    }

    async fn try_browser(&self, launcher: &dyn BrowserLauncher, spec: &QuerySpec) -> Outcome {
        let mut slot = self.extractor.lock().await;
        if slot.is_none() {
            info!("Starting browser session");
            match launcher.launch().await {
                Ok(driver) => *slot = Some(BrowserExtractor::new(driver, self.timings)),
                Err(e) => {
                    warn!("Browser unavailable: {}", e);
                    return Outcome::Fatal(e);
                }
            }
        }
        let Some(extractor) = slot.as_mut() else {
            return Outcome::StrategyExhausted(vec![Strategy::BrowserTable]);
        };
        let outcome = extractor.extract(&spec.page_url, spec.filter.as_ref()).await;
        debug!(
            "Extractor stopped at {} after {:?}",
            extractor.state(),
            extractor.history()
        );
        outcome
    }

    /// Release the browser tab, if one was opened.
    pub async fn shutdown(&self) {
        if let Some(extractor) = self.extractor.lock().await.take() {
            extractor.close().await;
        }
    }
}
