use serde_json::Value;

// ── Cell coercion ─────────────────────────────────────────────────────────────

fn is_blank(s: &str) -> bool {
    s.is_empty() || s == "N/A" || s == "-" || s == "—"
}

/// Parse a percentage string.
/// "+5.4%" → 5.4 | "-1,234.5 %" → -1234.5 | "N/A" / "NaN" / "inf" → None
pub fn parse_pct(s: &str) -> Option<f64> {
    let s = s.trim();
    if is_blank(s) {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '%' | ',' | ' ' | '+'))
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Coerce a row cell to a number. Numbers pass through, strings are parsed
/// after stripping `%` and thousands separators, anything else is null.
pub fn cell_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_pct(s),
        _ => None,
    }
}

/// Render a cell as plain text; strings lose their JSON quotes.
pub fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ── Symbols ───────────────────────────────────────────────────────────────────

pub fn normalise_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Spellings a listed symbol may appear under upstream: "BAJAJ-AUTO" also
/// matches "BAJAJAUTO".
pub fn symbol_variants(s: &str) -> Vec<String> {
    let sym = normalise_symbol(s);
    if sym.is_empty() || sym == "NAN" {
        return Vec::new();
    }
    let stripped = sym.replace('-', "");
    if stripped != sym {
        vec![sym, stripped]
    } else {
        vec![sym]
    }
}
