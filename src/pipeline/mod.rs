//! Pipeline orchestrator: ties the acquisition chain → ranking → CSV export.
//!
//! ## Run modes
//!
//! `Coordinator::run()`: one scan through API → browser table → export
//! detection. Always returns rows (possibly none).
//!
//! `MoversPipeline::run()`: the gainers/losers report.
//!   1. Load the reference index list
//!   2. Run the open=high and open=low scans concurrently, one session each
//!   3. Keep reference members, rank by % change, tag sections
//!   4. Write one CSV and hand back per-section summaries

pub mod coordinator;

pub use self::coordinator::{Coordinator, QuerySpec};

use crate::browser::{BrowserLauncher, Timings};
use crate::config::{AppConfig, BrowserConfig};
use crate::loader::{load_reference_set, ReferenceSet};
use crate::models::{Row, ScanQuery};
use crate::report::{
    columns_of, combine, filter_and_rank, find_pct_column, ordered_columns, Section,
    SectionSummary,
};
use crate::scraper::SessionContext;
use crate::storage::export_rows;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Browser launcher for the current build and config, if any.
pub fn build_launcher(cfg: &BrowserConfig) -> Option<Arc<dyn BrowserLauncher>> {
    if !cfg.enabled {
        info!("Browser fallback disabled");
        return None;
    }
    let Some(url) = cfg.websocket_url.as_deref() else {
        info!("No browser websocket configured, API path only");
        return None;
    };
    #[cfg(feature = "browser")]
    {
        Some(Arc::new(crate::browser::chromium::ChromiumLauncher::new(url)))
    }
    #[cfg(not(feature = "browser"))]
    {
        warn!("Browser websocket {} ignored: built without the `browser` feature", url);
        None
    }
}

/// A coordinator with its own session.
pub fn build_coordinator(cfg: &AppConfig) -> Result<Coordinator> {
    let ctx = SessionContext::new(&cfg.scraper).context("Failed to build HTTP session")?;
    Ok(Coordinator::new(
        ctx,
        build_launcher(&cfg.browser),
        Timings::from(&cfg.browser),
    ))
}

/// "nifty100" → "Nifty 100", the label the screener page shows.
pub fn segment_label(segment: &str) -> String {
    let mut out = String::new();
    let mut prev: Option<char> = None;
    for ch in segment.chars() {
        if let Some(p) = prev {
            if p.is_ascii_alphabetic() && ch.is_ascii_digit() {
                out.push(' ');
            }
        }
        if prev.is_none() {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }
    out
}

// ── Movers report ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MoversStats {
    pub gainers: SectionSummary,
    pub losers: SectionSummary,
    pub output: Option<PathBuf>,
    pub rows_written: usize,
}

pub struct MoversPipeline {
    config: AppConfig,
}

impl MoversPipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn spec(&self, url: &str, condition: &str) -> QuerySpec {
        let r = &self.config.report;
        QuerySpec::new(ScanQuery::segmented(&r.segment, condition), url).with_segment_filter()
    }

    pub async fn run(&self) -> Result<MoversStats> {
        let gainers = build_coordinator(&self.config)?;
        let losers = build_coordinator(&self.config)?;
        let stats = self.run_with(&gainers, &losers).await;
        tokio::join!(gainers.shutdown(), losers.shutdown());
        stats
    }

    /// Run the report on caller-supplied coordinators (one per section).
    pub async fn run_with(&self, gainers: &Coordinator, losers: &Coordinator) -> Result<MoversStats> {
        let r = &self.config.report;
        let reference = load_reference_set(&r.reference_csv, &r.extra_symbols)
            .with_context(|| format!("Loading reference list {:?}", r.reference_csv))?;

        // ── 1. Both scans, concurrently ───────────────────────────────────────
        info!("=== Step 1: Running gainers and losers scans ===");
        let gainers_spec = self.spec(&r.gainers_url, &r.gainers_condition);
        let losers_spec = self.spec(&r.losers_url, &r.losers_condition);
        let (g, l) = tokio::join!(
            gainers.run_detailed(&gainers_spec),
            losers.run_detailed(&losers_spec)
        );
        info!("Gainers: {} rows via {:?}", g.rows.len(), g.source);
        info!("Losers: {} rows via {:?}", l.rows.len(), l.source);

        // ── 2. Rank against the reference list ────────────────────────────────
        info!("=== Step 2: Ranking against {} reference symbols ===", reference.len());
        let (g_rows, g_summary) = self.rank(Section::Gainers, g.rows, &reference);
        let (l_rows, l_summary) = self.rank(Section::Losers, l.rows, &reference);

        // ── 3. Export ─────────────────────────────────────────────────────────
        let combined = combine(g_rows, l_rows);
        let output = if combined.is_empty() {
            warn!("No rows for either section, nothing written");
            None
        } else {
            info!("=== Step 3: Writing {} rows ===", combined.len());
            let columns = ordered_columns(&combined);
            Some(export_rows(&r.output, &columns, &combined)?)
        };

        Ok(MoversStats {
            gainers: g_summary,
            losers: l_summary,
            output,
            rows_written: combined.len(),
        })
    }

    fn rank(&self, section: Section, rows: Vec<Row>, reference: &ReferenceSet) -> (Vec<Row>, SectionSummary) {
        let r = &self.config.report;
        let columns = columns_of(&rows);
        let pct = find_pct_column(columns.iter().map(String::as_str)).map(str::to_string);
        if pct.is_none() && !rows.is_empty() {
            warn!("{}: no % change column among {:?}", section.title(), columns);
        }
        let ranked = filter_and_rank(rows, reference, &r.symbol_column, pct.as_deref());
        let summary =
            SectionSummary::from_rows(section, &ranked, &r.symbol_column, pct.as_deref(), r.top_n);
        (ranked, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReportConfig, ScraperConfig};
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_segment_label() {
        assert_eq!(segment_label("nifty100"), "Nifty 100");
        assert_eq!(segment_label("nifty"), "Nifty");
        assert_eq!(segment_label(""), "");
    }

    #[test]
    fn test_launcher_needs_websocket() {
        let cfg = BrowserConfig::default();
        assert!(build_launcher(&cfg).is_none());
        let off = BrowserConfig {
            enabled: false,
            websocket_url: Some("ws://127.0.0.1:9222/devtools/browser/x".into()),
            ..BrowserConfig::default()
        };
        assert!(build_launcher(&off).is_none());
    }

    fn form(clause: &str) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("scan_clause", clause)
            .finish()
    }

    fn session(server: &MockServer) -> SessionContext {
        SessionContext::new(&ScraperConfig {
            base_url: server.base_url(),
            ..ScraperConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_movers_report_end_to_end() {
        let server = MockServer::start();
        for path in ["/screener/gainers", "/screener/losers"] {
            server.mock(|when, then| {
                when.method(GET).path(path);
                then.status(200)
                    .body(r#"<meta name="csrf-token" content="tok">"#);
            });
        }
        server.mock(|when, then| {
            when.method(POST)
                .path("/screener/process")
                .body(form("( {nifty100} ( latest open = latest high ) )"));
            then.status(200).json_body(json!({"data": [
                {"sr": 1, "nsecode": "AAA", "name": "Alpha", "per_chg": 1.5, "close": 10},
                {"sr": 2, "nsecode": "XYZ", "name": "Outsider", "per_chg": 9.0, "close": 5},
                {"sr": 3, "nsecode": "BBB", "name": "Beta", "per_chg": 3.0, "close": 20},
            ]}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/screener/process")
                .body(form("( {nifty100} ( latest open = latest low ) )"));
            then.status(200).json_body(json!({"data": [
                {"sr": 1, "nsecode": "CCC", "name": "Gamma", "per_chg": -2.0, "close": 30},
            ]}));
        });

        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("index.csv");
        std::fs::File::create(&reference)
            .unwrap()
            .write_all(b"Company Name,Symbol\nAlpha,AAA\nBeta,BBB\n")
            .unwrap();

        let config = AppConfig {
            report: ReportConfig {
                reference_csv: reference,
                extra_symbols: vec!["CCC".into()],
                output: dir.path().join("movers.csv"),
                gainers_url: server.url("/screener/gainers"),
                losers_url: server.url("/screener/losers"),
                ..ReportConfig::default()
            },
            ..AppConfig::default()
        };

        let gainers = Coordinator::new(session(&server), None, Timings::immediate());
        let losers = Coordinator::new(session(&server), None, Timings::immediate());
        let stats = MoversPipeline::new(config)
            .run_with(&gainers, &losers)
            .await
            .unwrap();

        assert_eq!(stats.rows_written, 3);
        assert_eq!(stats.gainers.total, 2);
        assert_eq!(stats.gainers.best().unwrap().symbol, "BBB");
        assert_eq!(stats.losers.negative, 1);

        let text = std::fs::read_to_string(stats.output.unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Section,Type,sr,nsecode,name,per_chg,close");
        assert!(lines[1].contains("Gainer,3,BBB,Beta,3.0,20"));
        assert!(lines[3].starts_with("Top Losers (Open = Low),Loser,1,CCC"));
    }
}
