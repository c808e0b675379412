use thiserror::Error;

use crate::migrate::migration_result::MigrationReport;
use crate::migrate::validator::CompatibilityReport;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Cannot connect to {side} database")]
    Connection {
        side: Side,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to read {side} schema metadata")]
    Introspection {
        side: Side,
        #[source]
        source: anyhow::Error,
    },

    #[error("Source and target schemas are incompatible: {}", .0.summary())]
    Compatibility(CompatibilityReport),

    #[error("Batch write to table {table} failed after {attempts} attempts")]
    BatchWrite {
        table: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error("Watermark store failure for table {table}")]
    Watermark {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// The run itself completed; `report` is what could not be written.
    #[error("Failed to persist migration report")]
    Report {
        report: Box<MigrationReport>,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Raised when a delete fails partway through a rollback. Tables listed in
/// `rolled_back` are already empty; `pending` still hold migrated rows and
/// need a manual re-run.
#[derive(Debug, Error)]
#[error(
    "Rollback stopped at table {failed_table} (rolled back: [{}], pending: [{}])",
    .rolled_back.join(", "),
    .pending.join(", ")
)]
pub struct RollbackError {
    pub rolled_back: Vec<String>,
    pub failed_table: String,
    pub pending: Vec<String>,
    #[source]
    pub source: anyhow::Error,
}
