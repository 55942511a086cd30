use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::airquality::types::StationReading;
use crate::error::AlertError;
use crate::formatter::format_index;

const HEADER: &str = "| ts | station_id | station_name | ias | category | image_url | dispatch |\n\
                      |---|---|---|---|---|---|---|";

/// Append-only Markdown log of alert runs.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn append_line(&self, line: &str) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let fresh = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        if fresh {
            writeln!(file, "{}", HEADER)?;
        }
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn log_alert(
        &self,
        at: DateTime<Utc>,
        station: &StationReading,
        image_url: &str,
        dispatch: &str,
    ) -> Result<()> {
        let line = format!(
            "| {} | {} | {} | {} | {} | {} | {} |",
            at.format("%Y-%m-%dT%H:%M:%SZ"),
            cell(&station.station_id),
            cell(&station.station_name),
            format_index(station.score()),
            cell(station.ias.category.label()),
            image_url,
            dispatch,
        );
        self.append_line(&line)
    }

    pub fn log_failure(&self, at: DateTime<Utc>, error: &AlertError) -> Result<()> {
        let line = format!(
            "| {} | - | - | - | - | - | FAILED {}: {} |",
            at.format("%Y-%m-%dT%H:%M:%SZ"),
            error.kind(),
            cell(&error.to_string()),
        );
        self.append_line(&line)
    }
}

/// Keep a value inside one table cell.
fn cell(value: &str) -> String {
    value.replace('|', "/").replace('\n', " ")
}
