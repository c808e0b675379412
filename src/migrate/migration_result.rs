use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::schema::SchemaSnapshot;
use crate::migrate::validator::CompatibilityReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of one table in one run. Never modified once the table is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub table: String,
    pub rows_migrated: u64,
    pub status: MigrationStatus,
    pub error: Option<String>,
}

impl MigrationRecord {
    pub fn success(table: &str, rows_migrated: u64) -> Self {
        MigrationRecord {
            table: table.to_string(),
            rows_migrated,
            status: MigrationStatus::Success,
            error: None,
        }
    }

    pub fn failed(table: &str, rows_migrated: u64, error: String) -> Self {
        MigrationRecord {
            table: table.to_string(),
            rows_migrated,
            status: MigrationStatus::Failed,
            error: Some(error),
        }
    }

    pub fn skipped(table: &str, rows_migrated: u64) -> Self {
        MigrationRecord {
            table: table.to_string(),
            rows_migrated,
            status: MigrationStatus::Skipped,
            error: None,
        }
    }
}

/// Terminal classification of a run, handed to the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalEvent {
    Success,
    Partial,
    Aborted,
}

impl std::fmt::Display for TerminalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalEvent::Success => write!(f, "success"),
            TerminalEvent::Partial => write!(f, "partial"),
            TerminalEvent::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub timestamp: DateTime<Utc>,
    pub source_snapshot: SchemaSnapshot,
    pub target_snapshot: SchemaSnapshot,
    pub compatibility: Option<CompatibilityReport>,
    /// In dispatch order; rollback walks it backwards.
    pub records: Vec<MigrationRecord>,
    pub aborted: bool,
}

impl MigrationReport {
    pub fn outcome(&self) -> TerminalEvent {
        if self.aborted {
            TerminalEvent::Aborted
        } else if self
            .records
            .iter()
            .all(|record| record.status == MigrationStatus::Success)
        {
            TerminalEvent::Success
        } else {
            TerminalEvent::Partial
        }
    }

    /// True when the run was vetoed before any data was copied.
    pub fn is_incompatible(&self) -> bool {
        self.compatibility
            .as_ref()
            .map_or(false, |report| !report.overall_compatible)
    }

    pub fn records_with_status(&self, status: MigrationStatus) -> impl Iterator<Item = &MigrationRecord> {
        self.records
            .iter()
            .filter(move |record| record.status == status)
    }

    pub fn total_rows_migrated(&self) -> u64 {
        self.records.iter().map(|record| record.rows_migrated).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(records: Vec<MigrationRecord>, aborted: bool) -> MigrationReport {
        MigrationReport {
            timestamp: Utc::now(),
            source_snapshot: SchemaSnapshot::default(),
            target_snapshot: SchemaSnapshot::default(),
            compatibility: None,
            records,
            aborted,
        }
    }

    #[test]
    fn outcome_classification() {
        let all_good = report(
            vec![
                MigrationRecord::success("users", 10),
                MigrationRecord::success("orders", 5),
            ],
            false,
        );
        assert_eq!(all_good.outcome(), TerminalEvent::Success);
        assert_eq!(all_good.total_rows_migrated(), 15);

        let some_failed = report(
            vec![
                MigrationRecord::success("users", 10),
                MigrationRecord::failed("orders", 0, "boom".to_string()),
            ],
            false,
        );
        assert_eq!(some_failed.outcome(), TerminalEvent::Partial);

        let cancelled = report(vec![MigrationRecord::skipped("users", 0)], true);
        assert_eq!(cancelled.outcome(), TerminalEvent::Aborted);
    }

    #[test]
    fn empty_successful_run_is_success() {
        assert_eq!(report(vec![], false).outcome(), TerminalEvent::Success);
    }
}
