use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ScrapeError;

// ── Normalized row ────────────────────────────────────────────────────────────

/// One uniformly-keyed record: column name → cell value (string, number or null).
/// Column order is insertion order (`serde_json` is built with `preserve_order`).
pub type Row = serde_json::Map<String, serde_json::Value>;

// ── Session credential ────────────────────────────────────────────────────────

/// Anti-CSRF token scraped from the screener page.
///
/// Replaced wholesale on refresh; never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source_url: String,
    pub acquired_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source_url: source_url.into(),
            acquired_at: Utc::now(),
        }
    }

    /// True once the credential has outlived `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        Utc::now() - self.acquired_at >= ttl
    }

    /// First few characters, for logs.
    pub fn preview(&self) -> String {
        let head: String = self.token.chars().take(20).collect();
        format!("{}...", head)
    }
}

// ── Scan query ────────────────────────────────────────────────────────────────

/// Screener filter expression, e.g. `( {nifty100} ( latest open = latest high ) )`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanQuery {
    clause: String,
}

impl ScanQuery {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
        }
    }

    /// `( {segment} ( condition ) )`
    pub fn segmented(segment: &str, condition: &str) -> Self {
        Self::new(format!("( {{{}}} ( {} ) )", segment.trim(), condition.trim()))
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    /// The `{...}` segment identifier, if the clause targets one.
    pub fn segment(&self) -> Option<&str> {
        let start = self.clause.find('{')?;
        let end = start + self.clause[start..].find('}')?;
        let seg = self.clause[start + 1..end].trim();
        if seg.is_empty() { None } else { Some(seg) }
    }
}

impl fmt::Display for ScanQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clause)
    }
}

/// Ordered clause candidates for a segment the upstream may spell differently.
///
/// The segment as given, spaced, upper-case, upper-case spaced, hyphenated and
/// underscored; then the trailing `and {segment}` form; finally the bare
/// condition so the caller can still filter locally.
pub fn segment_variants(segment: &str, condition: &str) -> Vec<ScanQuery> {
    let base = segment.trim().to_lowercase().replace([' ', '-', '_'], "");
    let split = base
        .find(|c: char| c.is_ascii_digit())
        .filter(|&i| i > 0)
        .map(|i| (base[..i].to_string(), base[i..].to_string()));

    let mut names = vec![base.clone()];
    if let Some((word, num)) = &split {
        names.push(format!("{} {}", word, num));
    }
    names.push(base.to_uppercase());
    if let Some((word, num)) = &split {
        names.push(format!("{} {}", word.to_uppercase(), num));
        names.push(format!("{}-{}", word, num));
        names.push(format!("{}_{}", word, num));
    }

    let mut queries: Vec<ScanQuery> = Vec::new();
    for name in &names {
        let q = ScanQuery::segmented(name, condition);
        if !queries.contains(&q) {
            queries.push(q);
        }
    }
    queries.push(ScanQuery::new(format!(
        "( {} and {{{}}} )",
        condition.trim(),
        base
    )));
    queries.push(ScanQuery::new(format!("( {} )", condition.trim())));
    queries
}

// ── Raw result set ────────────────────────────────────────────────────────────

/// Unprocessed payload from either the API or a scraped document.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResultSet {
    Json(serde_json::Value),
    Table(Vec<Row>),
}

// ── Extraction outcome ────────────────────────────────────────────────────────

/// Which acquisition path produced (or failed to produce) rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Api,
    BrowserTable,
    ExportButton,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Api => "api",
            Strategy::BrowserTable => "browser-table",
            Strategy::ExportButton => "export-button",
        };
        f.write_str(s)
    }
}

/// Value threaded through the fallback chain. Failures are data, not panics.
#[derive(Debug)]
pub enum Outcome {
    Success(Vec<Row>),
    EmptyResult,
    StrategyExhausted(Vec<Strategy>),
    Fatal(ScrapeError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(rows) if !rows.is_empty())
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Outcome::Success(rows) => rows,
            _ => Vec::new(),
        }
    }

    /// One-line description for diagnostics.
    pub fn summary(&self) -> String {
        match self {
            Outcome::Success(rows) => format!("success ({} rows)", rows.len()),
            Outcome::EmptyResult => "empty result".to_string(),
            Outcome::StrategyExhausted(tried) => {
                let names: Vec<String> = tried.iter().map(|s| s.to_string()).collect();
                format!("strategies exhausted [{}]", names.join(", "))
            }
            Outcome::Fatal(e) => format!("fatal: {}", e),
        }
    }
}
