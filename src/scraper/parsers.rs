use crate::models::Row;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

// ── CSRF token ────────────────────────────────────────────────────────────────

/// `<meta name="csrf-token" content="...">` → the content value.
pub fn parse_csrf_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"meta[name="csrf-token"]"#).ok()?;
    doc.select(&sel)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

// ── Scan clause discovery ─────────────────────────────────────────────────────

static SCRIPT_CLAUSE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#""scan_clause"\s*:\s*"([^"]+)""#,
        r#"'scan_clause'\s*:\s*'([^']+)'"#,
        r#""scanClause"\s*:\s*"([^"]+)""#,
        r#"scan[_\s]?clause["']?\s*[:=]\s*["']([^"']+)["']"#,
        r#"scanClause["']?\s*[:=]\s*["']([^"']+)["']"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?is){}", p)).ok())
    .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Look for a scan clause embedded in the screener page.
///
/// Sources, in order: `data-scan-clause` attributes, hidden inputs named like
/// a clause, then script bodies. A candidate must mention every term in
/// `required_terms` (case-insensitive).
pub fn discover_scan_clause(html: &str, required_terms: &[&str]) -> Option<String> {
    let doc = Html::parse_document(html);
    let accept = |raw: &str| -> Option<String> {
        let clause = WHITESPACE.replace_all(raw.trim(), " ").to_string();
        let lower = clause.to_lowercase();
        let ok = !clause.is_empty()
            && required_terms.iter().all(|t| lower.contains(&t.to_lowercase()));
        ok.then_some(clause)
    };

    if let Ok(sel) = Selector::parse("[data-scan-clause]") {
        for el in doc.select(&sel) {
            if let Some(c) = el.value().attr("data-scan-clause").and_then(accept) {
                debug!("Scan clause found in data attribute");
                return Some(c);
            }
        }
    }

    if let Ok(sel) = Selector::parse(r#"input[type="hidden"]"#) {
        for el in doc.select(&sel) {
            let name = el.value().attr("name").unwrap_or_default().to_lowercase();
            if !(name.contains("scan") || name.contains("clause")) {
                continue;
            }
            if let Some(c) = el.value().attr("value").and_then(accept) {
                debug!("Scan clause found in hidden input {:?}", name);
                return Some(c);
            }
        }
    }

    if let Ok(sel) = Selector::parse("script") {
        for script in doc.select(&sel) {
            let body: String = script.text().collect();
            for re in SCRIPT_CLAUSE_PATTERNS.iter() {
                for cap in re.captures_iter(&body) {
                    if let Some(c) = cap.get(1).and_then(|m| accept(m.as_str())) {
                        debug!("Scan clause found in script body");
                        return Some(c);
                    }
                }
            }
        }
    }

    None
}

// ── Result table ──────────────────────────────────────────────────────────────

/// Table candidates, most specific first.
pub const TABLE_SELECTORS: &[&str] = &[
    "table.dataTable",
    "table.table",
    "div[class*='table'] table",
    "table",
];

/// Header used when the table exposes none.
pub const DEFAULT_HEADERS: &[&str] = &[
    "Sr.", "Stock Name", "Symbol", "Links", "% Chg", "Price", "Volume",
];

/// Cells with this exact text are repeated headers, not data.
const KNOWN_HEADER_LABELS: &[&str] = &["sr.", "stock name", "symbol", "% chg", "price", "volume"];

/// Rows need at least this many populated cells to count.
const MIN_VALUES_PER_ROW: usize = 2;

/// Harvested table before it is declared a success or a miss.
#[derive(Debug, Default)]
pub struct TableScrape {
    pub selector: Option<&'static str>,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub raw_row_count: usize,
}

impl TableScrape {
    pub fn found(&self) -> bool {
        self.selector.is_some()
    }
}

fn cell_text(el: ElementRef<'_>) -> String {
    let joined: String = el.text().collect::<Vec<_>>().join(" ");
    WHITESPACE.replace_all(joined.trim(), " ").to_string()
}

fn sel(s: &str) -> Option<Selector> {
    match Selector::parse(s) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!("Bad selector {:?}: {:?}", s, e);
            None
        }
    }
}

/// Locate the results table in `html` and turn its body rows into [`Row`]s.
///
/// Header cells come from `thead`, else the first row, else [`DEFAULT_HEADERS`].
/// A cell is dropped when its text is empty or equals one of the fixed column
/// labels the site repeats inside the body; a row is dropped when fewer than
/// two values survive.
pub fn extract_table(html: &str, candidates: &[&'static str]) -> TableScrape {
    let doc = Html::parse_document(html);

    let Some((selector, table)) = candidates.iter().find_map(|s| {
        let parsed = sel(s)?;
        doc.select(&parsed).next().map(|t| (*s, t))
    }) else {
        debug!("No table matched {:?}", candidates);
        return TableScrape::default();
    };
    debug!("Found table using selector: {}", selector);

    let (Some(th_sel), Some(tr_sel), Some(td_sel), Some(cell_sel)) = (
        sel("thead th"),
        sel("tr"),
        sel("td"),
        sel("th, td"),
    ) else {
        return TableScrape::default();
    };

    // Only rows owned by this table, not by nested tables
    let own_rows: Vec<ElementRef<'_>> = table
        .select(&tr_sel)
        .filter(|tr| {
            tr.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "table")
                .map(|t| t.id() == table.id())
                .unwrap_or(false)
        })
        .collect();

    let mut headers: Vec<String> = table
        .select(&th_sel)
        .map(cell_text)
        .filter(|t| !t.is_empty())
        .collect();

    if headers.is_empty() {
        if let Some(first) = own_rows.first() {
            headers = first
                .select(&cell_sel)
                .map(cell_text)
                .filter(|t| !t.is_empty())
                .collect();
        }
    }

    if headers.is_empty() {
        debug!("Using default headers");
        headers = DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect();
    }

    let mut rows = Vec::new();
    let mut raw_row_count = 0usize;

    for tr in &own_rows {
        let cells: Vec<String> = tr.select(&td_sel).map(cell_text).collect();
        if cells.is_empty() {
            continue;
        }
        raw_row_count += 1;

        let mut row = Row::new();
        for (idx, text) in cells.into_iter().enumerate() {
            if text.is_empty() || KNOWN_HEADER_LABELS.contains(&text.to_lowercase().as_str()) {
                continue;
            }
            let key = headers
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("Column_{}", idx + 1));
            row.insert(key, Value::String(text));
        }

        if row.len() >= MIN_VALUES_PER_ROW {
            rows.push(row);
        }
    }

    debug!(
        "Table {}: {} headers, {} body rows, {} kept",
        selector,
        headers.len(),
        raw_row_count,
        rows.len()
    );

    TableScrape {
        selector: Some(selector),
        headers,
        rows,
        raw_row_count,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
