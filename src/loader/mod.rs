//! CSV loader for the reference index membership list (e.g. the NSE Nifty 100
//! constituents file).

use crate::scraper::cleaner::symbol_variants;
use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub type ReferenceSet = HashSet<String>;

/// Read the `Symbol` column of `path` into a set of accepted identifiers.
///
/// Each symbol is trimmed and upper-cased; hyphenated symbols are also stored
/// without the hyphen. `extra` is merged in. A missing file is not an error:
/// the set then holds only `extra`.
pub fn load_reference_set(path: &Path, extra: &[String]) -> Result<ReferenceSet> {
    let mut set = ReferenceSet::new();

    if !path.exists() {
        warn!("Reference list {:?} not found, using {} extra symbols only", path, extra.len());
    } else {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Opening {:?}", path))?;

        let headers = reader.headers()?.clone();
        let Some(col) = headers.iter().position(|h| h.eq_ignore_ascii_case("symbol")) else {
            bail!("{:?} has no Symbol column (headers: {:?})", path, headers);
        };

        for (i, result) in reader.records().enumerate() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("Row {} in {:?}: {}", i + 1, path, e);
                    continue;
                }
            };
            if let Some(raw) = record.get(col) {
                set.extend(symbol_variants(raw));
            }
        }
        debug!("{} symbols read from {:?}", set.len(), path);
    }

    for sym in extra {
        set.extend(symbol_variants(sym));
    }

    info!("Reference set: {} symbols", set.len());
    Ok(set)
}
