use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::dump::DumpResult;
use crate::error::{Error, Result};

const FILE_PREFIX: &str = "esp32_impact_data_";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `esp32_impact_data_<YYYY-MM-DD_HH-MM-SS>.csv`, with a `_partial` suffix for salvaged runs.
pub fn output_file_name(started: &NaiveDateTime, partial: bool) -> String {
    let suffix = if partial { "_partial" } else { "" };
    format!(
        "{}{}{}.csv",
        FILE_PREFIX,
        started.format(TIMESTAMP_FORMAT),
        suffix
    )
}

/// Write the header and every row. Rows are written as-is even when their
/// field count differs from the header.
pub fn write_csv(path: &Path, result: &DumpResult) -> Result<()> {
    let to_sink = |source: csv::Error| Error::Sink {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(to_sink)?;
    writer.write_record(&result.headers).map_err(to_sink)?;
    for row in &result.rows {
        writer.write_record(row).map_err(to_sink)?;
    }
    writer.flush().map_err(|e| to_sink(e.into()))
}

pub struct RecordSink {
    dir: PathBuf,
}

impl RecordSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RecordSink { dir: dir.into() }
    }

    pub fn save(&self, result: &DumpResult, started: &NaiveDateTime, partial: bool) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|source| Error::CreateOutput {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(output_file_name(started, partial));
        write_csv(&path, result)?;
        info!(path = %path.display(), rows = result.rows.len(), "saved dump");
        Ok(path)
    }
}
