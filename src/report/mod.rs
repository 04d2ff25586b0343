//! Ranking against the reference list, section tagging and console summary
//! for the gainers/losers report.

use crate::loader::ReferenceSet;
use crate::models::Row;
use crate::scraper::cleaner::{cell_number, cell_text, normalise_symbol};
use crate::utils::fmt_number;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use tracing::{info, warn};

/// Leading columns of the combined report, when present.
pub const PREFERRED_COLUMNS: &[&str] = &[
    "Section", "Type", "sr", "nsecode", "name", "bsecode", "per_chg", "close", "volume",
];

// ── Columns ───────────────────────────────────────────────────────────────────

/// Union of keys across `rows`, in first-seen order.
pub fn columns_of(rows: &[Row]) -> Vec<String> {
    let mut cols: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !cols.contains(key) {
                cols.push(key.clone());
            }
        }
    }
    cols
}

/// First column that looks like a percent change.
pub fn find_pct_column<'a, I>(columns: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    columns.into_iter().find(|c| {
        let lower = c.to_lowercase();
        ["chg", "change", "pct", "%"].iter().any(|m| lower.contains(m))
    })
}

/// Preferred columns that exist, then everything else in first-seen order.
pub fn ordered_columns(rows: &[Row]) -> Vec<String> {
    let all = columns_of(rows);
    let mut out: Vec<String> = PREFERRED_COLUMNS
        .iter()
        .filter(|c| all.iter().any(|a| a == *c))
        .map(|c| c.to_string())
        .collect();
    out.extend(all.into_iter().filter(|c| !PREFERRED_COLUMNS.contains(&c.as_str())));
    out
}

// ── Filter + rank ─────────────────────────────────────────────────────────────

fn descending_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Keep rows whose `symbol_column` is in `reference`, then sort by
/// `pct_column` descending with nulls last.
///
/// Filtering only applies when some row carries `symbol_column`; sorting only
/// when `pct_column` is given. The sort is stable.
pub fn filter_and_rank(
    rows: Vec<Row>,
    reference: &ReferenceSet,
    symbol_column: &str,
    pct_column: Option<&str>,
) -> Vec<Row> {
    let before = rows.len();
    let mut kept: Vec<Row> = if rows.iter().any(|r| r.contains_key(symbol_column)) {
        rows.into_iter()
            .filter(|r| {
                r.get(symbol_column)
                    .map(|v| reference.contains(&normalise_symbol(&cell_text(v))))
                    .unwrap_or(false)
            })
            .collect()
    } else {
        warn!("Column {:?} absent, skipping reference filter", symbol_column);
        rows
    };
    info!("{} of {} rows in reference list", kept.len(), before);

    if let Some(col) = pct_column {
        kept.sort_by(|a, b| {
            descending_nulls_last(
                a.get(col).and_then(cell_number),
                b.get(col).and_then(cell_number),
            )
        });
    }
    kept
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Gainers,
    Losers,
}

impl Section {
    pub fn title(&self) -> &'static str {
        match self {
            Section::Gainers => "Top Gainers (Open = High)",
            Section::Losers => "Top Losers (Open = Low)",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Section::Gainers => "Gainer",
            Section::Losers => "Loser",
        }
    }
}

/// Prefix every row with `Section` and `Type`.
pub fn tag_rows(rows: Vec<Row>, section: Section) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let mut tagged = Row::new();
            tagged.insert("Section".into(), Value::String(section.title().into()));
            tagged.insert("Type".into(), Value::String(section.kind().into()));
            for (k, v) in row {
                if k != "Section" && k != "Type" {
                    tagged.insert(k, v);
                }
            }
            tagged
        })
        .collect()
}

/// Gainers then losers, each tagged.
pub fn combine(gainers: Vec<Row>, losers: Vec<Row>) -> Vec<Row> {
    let mut all = tag_rows(gainers, Section::Gainers);
    all.extend(tag_rows(losers, Section::Losers));
    all
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Leader {
    pub symbol: String,
    pub name: Option<String>,
    pub pct: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionSummary {
    pub section: Section,
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
    pub top: Vec<Leader>,
}

impl SectionSummary {
    /// `rows` must already be ranked.
    pub fn from_rows(
        section: Section,
        rows: &[Row],
        symbol_column: &str,
        pct_column: Option<&str>,
        top_n: usize,
    ) -> Self {
        let pct = |r: &Row| pct_column.and_then(|c| r.get(c)).and_then(cell_number);
        let top = rows
            .iter()
            .take(top_n)
            .map(|r| Leader {
                symbol: r
                    .get(symbol_column)
                    .or_else(|| r.get("name"))
                    .map(cell_text)
                    .unwrap_or_else(|| "N/A".into()),
                name: r.get("name").map(cell_text),
                pct: pct(r),
                close: r.get("close").and_then(cell_number),
                volume: r.get("volume").and_then(cell_number),
            })
            .collect();

        Self {
            section,
            total: rows.len(),
            positive: rows.iter().filter(|r| pct(r).is_some_and(|p| p > 0.0)).count(),
            negative: rows.iter().filter(|r| pct(r).is_some_and(|p| p < 0.0)).count(),
            top,
        }
    }

    pub fn best(&self) -> Option<&Leader> {
        self.top.first()
    }
}

impl fmt::Display for SectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} stocks)", self.section.title(), self.total)?;
        if self.top.is_empty() {
            return writeln!(f, "   no stocks");
        }
        for (i, l) in self.top.iter().enumerate() {
            let pct = l.pct.map(|p| format!("{:+.2}%", p)).unwrap_or_else(|| "-".into());
            let close = l.close.map(|c| format!("{:.2}", c)).unwrap_or_else(|| "-".into());
            let volume = l
                .volume
                .map(|v| fmt_number(v.round() as i64))
                .unwrap_or_else(|| "-".into());
            writeln!(
                f,
                "  {:>2}. {:<12} {:<32} {:>8} {:>10} {:>14}",
                i + 1,
                l.symbol,
                l.name.as_deref().unwrap_or(""),
                pct,
                close,
                volume
            )?;
        }
        writeln!(f, "   Positive changes: {}", self.positive)?;
        writeln!(f, "   Negative changes: {}", self.negative)?;
        if let Some(best) = self.best() {
            match best.pct {
                Some(p) => writeln!(f, "   Best performer: {} ({:.2}%)", best.symbol, p)?,
                None => writeln!(f, "   Best performer: {}", best.symbol)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn symbols(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| cell_text(&r["symbol"])).collect()
    }

    #[test]
    fn test_find_pct_column() {
        assert_eq!(find_pct_column(["sr", "nsecode", "per_chg", "close"]), Some("per_chg"));
        assert_eq!(find_pct_column(["Symbol", "% Chg"]), Some("% Chg"));
        assert_eq!(find_pct_column(["symbol", "pct_change"]), Some("pct_change"));
        assert_eq!(find_pct_column(["name", "close"]), None);
    }

    #[test]
    fn test_filter_then_rank_descending_nulls_last() {
        let rows = vec![
            row(json!({"symbol": "AAA", "pct_change": 1.0})),
            row(json!({"symbol": "ZZZ", "pct_change": 9.0})),
            row(json!({"symbol": "BBB", "pct_change": null})),
            row(json!({"symbol": "aaa", "pct_change": "3.5%"})),
            row(json!({"symbol": "BBB", "pct_change": 2.0})),
        ];
        let reference = ReferenceSet::from(["AAA".to_string(), "BBB".to_string()]);

        let ranked = filter_and_rank(rows, &reference, "symbol", Some("pct_change"));
        assert_eq!(symbols(&ranked), ["aaa", "BBB", "AAA", "BBB"]);
        assert_eq!(ranked[3]["pct_change"], Value::Null);
    }

    #[test]
    fn test_nan_change_ranks_with_nulls() {
        let rows = vec![
            row(json!({"symbol": "AAA", "pct_change": "NaN"})),
            row(json!({"symbol": "BBB", "pct_change": 1.0})),
            row(json!({"symbol": "CCC", "pct_change": 2.0})),
        ];
        let reference = ReferenceSet::from(["AAA", "BBB", "CCC"].map(String::from));
        let ranked = filter_and_rank(rows, &reference, "symbol", Some("pct_change"));
        assert_eq!(symbols(&ranked), ["CCC", "BBB", "AAA"]);
    }

    #[test]
    fn test_summary_ignores_infinite_volume() {
        let rows = vec![row(json!({"nsecode": "AAA", "per_chg": 1.0, "volume": "inf"}))];
        let s = SectionSummary::from_rows(Section::Gainers, &rows, "nsecode", Some("per_chg"), 5);
        assert_eq!(s.top[0].volume, None);
        assert!(s.to_string().contains("AAA"));
    }

    #[test]
    fn test_filter_preserves_order_without_pct() {
        let rows = vec![
            row(json!({"symbol": "BBB"})),
            row(json!({"symbol": "CCC"})),
            row(json!({"symbol": "AAA"})),
        ];
        let reference = ReferenceSet::from(["AAA".to_string(), "BBB".to_string()]);
        let kept = filter_and_rank(rows, &reference, "symbol", None);
        assert_eq!(symbols(&kept), ["BBB", "AAA"]);
    }

    #[test]
    fn test_missing_symbol_column_skips_filter() {
        let rows = vec![row(json!({"name": "X", "per_chg": 1})), row(json!({"name": "Y", "per_chg": 2}))];
        let kept = filter_and_rank(rows, &ReferenceSet::new(), "nsecode", Some("per_chg"));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0]["name"], "Y");
    }

    #[test]
    fn test_combine_tags_and_orders_columns() {
        let g = vec![row(json!({"extra": 1, "per_chg": 2.0, "nsecode": "AAA", "sr": 1}))];
        let l = vec![row(json!({"nsecode": "BBB", "per_chg": -1.0}))];
        let all = combine(g, l);

        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["Type"], "Gainer");
        assert_eq!(all[1]["Section"], "Top Losers (Open = Low)");
        assert_eq!(
            ordered_columns(&all),
            ["Section", "Type", "sr", "nsecode", "per_chg", "extra"]
        );
    }

    #[test]
    fn test_section_summary() {
        let rows = vec![
            row(json!({"nsecode": "AAA", "name": "Alpha", "per_chg": 4.25, "close": 100, "volume": 1200000})),
            row(json!({"nsecode": "BBB", "per_chg": -1.0})),
            row(json!({"nsecode": "CCC", "per_chg": 0})),
        ];
        let s = SectionSummary::from_rows(Section::Gainers, &rows, "nsecode", Some("per_chg"), 2);
        assert_eq!(s.total, 3);
        assert_eq!(s.positive, 1);
        assert_eq!(s.negative, 1);
        assert_eq!(s.top.len(), 2);
        assert_eq!(s.best().unwrap().symbol, "AAA");

        let text = s.to_string();
        assert!(text.contains("Best performer: AAA (4.25%)"));
        assert!(text.contains("1,200,000"));
    }
}
