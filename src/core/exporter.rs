// Exports command history as JSON or CSV
//
// Sensitive commands are left out entirely, not just redacted.

use crate::core::SemanticType;
use crate::db::{Command, Database};
use crate::error::{Result, TrailError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

const PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(TrailError::Validation(format!(
                "unknown export format '{}' (expected json or csv)",
                other
            ))),
        }
    }
}

/// One exported row, flat so it fits a CSV line
#[derive(Debug, Serialize)]
struct ExportRecord {
    id: i64,
    session_id: String,
    seq: i64,
    start_time: DateTime<Utc>,
    text: String,
    directory: String,
    semantic_type: SemanticType,
    complexity: i64,
    git_branch: Option<String>,
    exit_code: Option<i64>,
    duration_ms: Option<i64>,
}

impl From<Command> for ExportRecord {
    fn from(cmd: Command) -> Self {
        Self {
            id: cmd.id,
            session_id: cmd.session_id,
            seq: cmd.seq,
            start_time: cmd.start_time,
            text: cmd.text,
            directory: cmd.directory,
            semantic_type: cmd.semantic_type,
            complexity: cmd.complexity,
            git_branch: cmd.git_branch,
            exit_code: cmd.exit_code,
            duration_ms: cmd.duration_ms,
        }
    }
}

pub struct Exporter {
    db: Arc<Database>,
}

impl Exporter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Write every non-sensitive command, oldest first
    ///
    /// Returns how many commands were written.
    pub async fn export<W: Write>(&self, format: ExportFormat, writer: W) -> Result<usize> {
        let records = self.load().await?;
        let count = records.len();

        match format {
            ExportFormat::Json => {
                let mut writer = writer;
                serde_json::to_writer_pretty(&mut writer, &records)?;
                writeln!(writer)?;
                writer.flush()?;
            }
            ExportFormat::Csv => {
                let mut csv = csv::Writer::from_writer(writer);
                for record in &records {
                    csv.serialize(record)?;
                }
                csv.flush()?;
            }
        }

        tracing::info!(count, ?format, "history exported");
        Ok(count)
    }

    async fn load(&self) -> Result<Vec<ExportRecord>> {
        let mut records = Vec::new();
        let mut cursor = 0;

        loop {
            let page = self.db.scan_exportable(cursor, PAGE_SIZE).await?;
            let done = (page.len() as i64) < PAGE_SIZE;
            if let Some(last) = page.last() {
                cursor = last.id;
            }
            records.extend(page.into_iter().map(ExportRecord::from));
            if done {
                break;
            }
        }

        Ok(records)
    }
}
