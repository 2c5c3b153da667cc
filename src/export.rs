use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::crawler::RawRecord;
use crate::errors::AppResult;
use crate::records::NormalizedRecord;

const RAW_PREFIX: &str = "moso_raw";
const CSV_PREFIX: &str = "moso_filtered";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Serialize)]
pub struct ExportPaths {
    pub raw_json: PathBuf,
    pub csv: PathBuf,
}

pub fn timestamp_label(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Writes the raw dump and the CSV side by side under one timestamp.
pub fn export_run(
    output_dir: &Path,
    stamp: &str,
    raw: &[RawRecord],
    rows: &[NormalizedRecord],
) -> AppResult<ExportPaths> {
    fs::create_dir_all(output_dir)?;
    let raw_json = write_raw_json(output_dir, stamp, raw)?;
    let csv = write_csv(output_dir, stamp, rows)?;
    Ok(ExportPaths { raw_json, csv })
}

pub fn write_raw_json(output_dir: &Path, stamp: &str, raw: &[RawRecord]) -> AppResult<PathBuf> {
    let path = output_dir.join(format!("{RAW_PREFIX}_{stamp}.json"));
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, raw)?;
    writer.flush()?;
    info!(path = %path.display(), records = raw.len(), "wrote raw listing dump");
    Ok(path)
}

/// CSV with a UTF-8 BOM so spreadsheet tools pick up the Vietnamese text.
pub fn write_csv(output_dir: &Path, stamp: &str, rows: &[NormalizedRecord]) -> AppResult<PathBuf> {
    let path = output_dir.join(format!("{CSV_PREFIX}_{stamp}.csv"));
    let mut file = BufWriter::new(File::create(&path)?);
    file.write_all(UTF8_BOM)?;

    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = rows.len(), "wrote normalized listing csv");
    Ok(path)
}
