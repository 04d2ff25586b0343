use crate::models::Row;
use crate::scraper::cleaner::cell_text;
use anyhow::{Context, Result};
use chrono::Local;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ── CSV export ────────────────────────────────────────────────────────────────

/// `report.csv` → `report_20250101_093000.csv`
pub fn timestamped_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("export");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, stamp, ext),
        None => format!("{}_{}", stem, stamp),
    };
    path.with_file_name(name)
}

/// Write `rows` to `path` with the given column order. Missing cells are
/// empty strings.
pub fn write_csv(path: &Path, columns: &[String], rows: &[Row]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating {:?}", path))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(columns)?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(cell_text).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Like [`write_csv`], but if `path` cannot be created (typically locked by a
/// spreadsheet app) a timestamped sibling is used. Returns the path written.
pub fn export_rows(path: &Path, columns: &[String], rows: &[Row]) -> Result<PathBuf> {
    match write_csv(path, columns, rows) {
        Ok(()) => {
            info!("Saved {} rows to {:?}", rows.len(), path);
            Ok(path.to_path_buf())
        }
        Err(e) => {
            let alt = timestamped_path(path, &Local::now().format("%Y%m%d_%H%M%S").to_string());
            warn!("{:#}; writing {:?} instead", e, alt);
            write_csv(&alt, columns, rows)?;
            info!("Saved {} rows to {:?}", rows.len(), alt);
            Ok(alt)
        }
    }
}
