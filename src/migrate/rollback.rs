use std::sync::Arc;

use crate::database::RowWriter;
use crate::error::RollbackError;
use crate::migrate::migration_result::{MigrationReport, MigrationStatus};
use crate::migrate::watermark::WatermarkStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// `(table, rows_deleted)` in deletion order.
    pub rolled_back: Vec<(String, u64)>,
}

/// Undoes the data writes of a run by emptying, in reverse migration order,
/// every table the report marks as successfully migrated. Irreversible.
pub struct RollbackCoordinator {
    watermarks: Option<Arc<dyn WatermarkStore>>,
}

impl RollbackCoordinator {
    pub fn new() -> Self {
        RollbackCoordinator { watermarks: None }
    }

    /// Also forget the watermark of every rolled-back table, so the next run
    /// copies it from scratch.
    pub fn with_watermarks(watermarks: Arc<dyn WatermarkStore>) -> Self {
        RollbackCoordinator {
            watermarks: Some(watermarks),
        }
    }

    pub async fn rollback<W>(
        &self,
        report: &MigrationReport,
        target: &mut W,
    ) -> Result<RollbackSummary, RollbackError>
    where
        W: RowWriter + ?Sized,
    {
        let tables: Vec<&str> = report
            .records
            .iter()
            .rev()
            .filter(|record| record.status == MigrationStatus::Success)
            .map(|record| record.table.as_str())
            .collect();

        if tables.is_empty() {
            info!("Nothing to roll back");
            return Ok(RollbackSummary::default());
        }

        info!("Rolling back tables: {}", tables.join(", "));

        let mut summary = RollbackSummary::default();

        for (index, table) in tables.iter().enumerate() {
            match target.delete_all(table).await {
                Ok(deleted) => {
                    info!("Table {} rolled back, rows deleted: {}", table, deleted);
                    summary.rolled_back.push((table.to_string(), deleted));
                }
                Err(source) => {
                    let err = RollbackError {
                        rolled_back: summary
                            .rolled_back
                            .into_iter()
                            .map(|(table, _)| table)
                            .collect(),
                        failed_table: table.to_string(),
                        pending: tables[index..].iter().map(|t| t.to_string()).collect(),
                        source,
                    };
                    error!("{}", err);
                    return Err(err);
                }
            }

            if let Some(watermarks) = &self.watermarks {
                // The rows are deleted at this point, a reset failure is only logged
                if let Err(err) = watermarks.reset(table).await {
                    warn!("Failed to reset watermark for {}: {:#}", table, err);
                }
            }
        }

        Ok(summary)
    }
}

impl Default for RollbackCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
