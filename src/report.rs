use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::common::schema::SchemaSnapshot;
use crate::migrate::migration_result::{
    MigrationRecord, MigrationReport, MigrationStatus, TerminalEvent,
};
use crate::migrate::validator::CompatibilityReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableError {
    pub table: String,
    pub error: String,
}

/// Audit form of a [`MigrationReport`].
///
/// `migration_status` and `errors` are the summary consumed by humans and
/// tooling; `records` keeps the full ordered outcome so a report file can be
/// fed back into a rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub timestamp: DateTime<Utc>,
    pub source_schema: SchemaSnapshot,
    pub target_schema: SchemaSnapshot,
    pub migration_status: BTreeMap<String, u64>,
    pub errors: Vec<TableError>,
    pub outcome: TerminalEvent,
    pub aborted: bool,
    #[serde(default)]
    pub compatibility: Option<CompatibilityReport>,
    pub records: Vec<MigrationRecord>,
}

impl From<&MigrationReport> for ReportDocument {
    fn from(report: &MigrationReport) -> Self {
        let migration_status = report
            .records
            .iter()
            .map(|record| (record.table.clone(), record.rows_migrated))
            .collect();

        let errors = report
            .records
            .iter()
            .filter(|record| record.status == MigrationStatus::Failed)
            .map(|record| TableError {
                table: record.table.clone(),
                error: record.error.clone().unwrap_or_default(),
            })
            .collect();

        ReportDocument {
            timestamp: report.timestamp,
            source_schema: report.source_snapshot.clone(),
            target_schema: report.target_snapshot.clone(),
            migration_status,
            errors,
            outcome: report.outcome(),
            aborted: report.aborted,
            compatibility: report.compatibility.clone(),
            records: report.records.clone(),
        }
    }
}

impl From<ReportDocument> for MigrationReport {
    fn from(document: ReportDocument) -> Self {
        MigrationReport {
            timestamp: document.timestamp,
            source_snapshot: document.source_schema,
            target_snapshot: document.target_schema,
            compatibility: document.compatibility,
            records: document.records,
            aborted: document.aborted,
        }
    }
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn persist(&self, report: &MigrationReport) -> Result<()>;
}

pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileSink { path: path.into() }
    }

    pub async fn load(path: &Path) -> Result<MigrationReport> {
        let content = fs::read(path)
            .await
            .with_context(|| format!("Failed to read report file {}", path.display()))?;
        let document: ReportDocument = serde_json::from_slice(&content)
            .with_context(|| format!("Invalid report file {}", path.display()))?;
        Ok(document.into())
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn persist(&self, report: &MigrationReport) -> Result<()> {
        let content = serde_json::to_string_pretty(&ReportDocument::from(report))?;

        fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write report file {}", self.path.display()))?;

        info!("Migration report written to {}", self.path.display());
        Ok(())
    }
}

/// Receives the terminal event of a run. Delivery is up to the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: TerminalEvent, report: &MigrationReport) -> Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: TerminalEvent, report: &MigrationReport) -> Result<()> {
        let count = |status| report.records_with_status(status).count();
        let summary = format!(
            "Migration {}: {} succeeded, {} failed, {} skipped, {} rows copied",
            event,
            count(MigrationStatus::Success),
            count(MigrationStatus::Failed),
            count(MigrationStatus::Skipped),
            report.total_rows_migrated()
        );

        match event {
            TerminalEvent::Success => info!("{}", summary),
            TerminalEvent::Partial => warn!("{}", summary),
            TerminalEvent::Aborted => error!("{}", summary),
        }

        for record in report.records_with_status(MigrationStatus::Failed) {
            warn!(
                "└> {} - {}",
                record.table,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;

    fn report() -> MigrationReport {
        MigrationReport {
            timestamp: Utc::now(),
            source_snapshot: SchemaSnapshot::new(
                vec!["users".to_string(), "orders".to_string()],
                vec![],
                vec![],
            ),
            target_snapshot: SchemaSnapshot::default(),
            compatibility: None,
            records: vec![
                MigrationRecord::success("users", 42),
                MigrationRecord::failed("orders", 7, "Deadlock".to_string()),
            ],
            aborted: false,
        }
    }

    #[test]
    fn document_has_audit_shape() {
        let json = serde_json::to_value(ReportDocument::from(&report())).unwrap();

        for key in [
            "timestamp",
            "source_schema",
            "target_schema",
            "migration_status",
            "errors",
        ] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(json["migration_status"]["users"], Value::from(42));
        assert_eq!(json["migration_status"]["orders"], Value::from(7));
        assert_eq!(json["errors"][0]["table"], "orders");
        assert_eq!(json["errors"][0]["error"], "Deadlock");
        assert_eq!(json["outcome"], "partial");
    }

    #[tokio::test]
    async fn written_report_loads_back_for_rollback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("migration_report.json");
        let sink = JsonFileSink::new(&path);
        let original = report();

        sink.persist(&original).await.unwrap();
        let loaded = JsonFileSink::load(&path).await.unwrap();

        assert_eq!(loaded.records, original.records);
        assert_eq!(loaded.source_snapshot, original.source_snapshot);
        assert!(!loaded.aborted);
    }

    #[tokio::test]
    async fn invalid_report_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, r#"{"timestamp": "yesterday"}"#).unwrap();

        let err = JsonFileSink::load(&path).await.unwrap_err();

        assert!(err.to_string().starts_with("Invalid report file"));
    }
}
