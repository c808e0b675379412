use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::common::helpers::flatten_error_chain;
use crate::common::rows::RowBatch;
use crate::database::{RowReader, RowWriter};
use crate::error::MigrationError;
use crate::migrate::migration_options::MigrationOptions;
use crate::migrate::migration_result::MigrationRecord;
use crate::migrate::watermark::WatermarkStore;

enum Completion {
    Finished,
    Cancelled,
}

/// Copies one table in cursor order, one batch at a time.
///
/// A batch is written in a single transaction and the watermark is only moved
/// once that transaction has committed, so a crash loses at most the batch in
/// flight. Batches of the same table never overlap.
pub struct BatchMigrator {
    watermarks: Arc<dyn WatermarkStore>,
    options: MigrationOptions,
}

impl BatchMigrator {
    pub fn new(watermarks: Arc<dyn WatermarkStore>, options: MigrationOptions) -> Self {
        BatchMigrator {
            watermarks,
            options,
        }
    }

    pub async fn run<R, W>(
        &self,
        table: &str,
        source: &mut R,
        target: &mut W,
        cancel: &CancellationToken,
    ) -> MigrationRecord
    where
        R: RowReader + ?Sized,
        W: RowWriter + ?Sized,
    {
        info!("Migrating table: {}", table);

        let start_time = Instant::now();
        let mut rows_migrated = 0;

        let result = self
            .migrate_rows(table, source, target, cancel, &mut rows_migrated)
            .await;

        let elapsed = Instant::now()
            .saturating_duration_since(start_time)
            .as_secs_f32();

        match result {
            Ok(Completion::Finished) => {
                info!(
                    "Table {} migrated, rows: {}, took: {}s",
                    table, rows_migrated, elapsed
                );
                MigrationRecord::success(table, rows_migrated)
            }
            Ok(Completion::Cancelled) => {
                warn!(
                    "Table {} skipped after cancellation, rows committed: {}",
                    table, rows_migrated
                );
                MigrationRecord::skipped(table, rows_migrated)
            }
            Err(err) => {
                let err = err.context(format!("Error while migrating table: {}", table));
                error!(
                    "Table {} failed after {} rows: {}",
                    table,
                    rows_migrated,
                    flatten_error_chain(&err)
                );
                MigrationRecord::failed(table, rows_migrated, flatten_error_chain(&err))
            }
        }
    }

    async fn migrate_rows<R, W>(
        &self,
        table: &str,
        source: &mut R,
        target: &mut W,
        cancel: &CancellationToken,
        rows_migrated: &mut u64,
    ) -> Result<Completion>
    where
        R: RowReader + ?Sized,
        W: RowWriter + ?Sized,
    {
        if cancel.is_cancelled() {
            return Ok(Completion::Cancelled);
        }

        let table_exists = target
            .table_exists(table)
            .await
            .with_context(|| "Failed to check table existence".to_string())?;

        if !table_exists {
            return Err(anyhow!("Table {} does not exist on target", table));
        }

        let cursor_column = self.options.cursor_column_for(table);
        let batch_size = self.options.batch_size;

        let mut watermark = self
            .watermarks
            .get(table)
            .await
            .map_err(|source| MigrationError::Watermark {
                table: table.to_string(),
                source,
            })?
            .map(|watermark| watermark.cursor_value);

        match &watermark {
            Some(cursor) => info!("Resuming {} after {} = {}", table, cursor_column, cursor),
            None => debug!("No watermark for {}, migrating all rows", table),
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(Completion::Cancelled);
            }

            let batch = source
                .fetch_batch(table, cursor_column, watermark.as_ref(), batch_size)
                .await
                .with_context(|| format!("Failed to fetch rows from source table {}", table))?;

            let Some(max_cursor) = batch.max_cursor().cloned() else {
                break;
            };

            self.write_batch(table, target, &batch).await?;

            let committed = self
                .watermarks
                .commit(table, max_cursor)
                .await
                .map_err(|source| MigrationError::Watermark {
                    table: table.to_string(),
                    source,
                })?;

            *rows_migrated += batch.len() as u64;
            watermark = Some(committed.cursor_value);

            if batch.len() < batch_size {
                break;
            }
        }

        Ok(Completion::Finished)
    }

    /// Retries the same batch with exponential backoff. The watermark is not
    /// touched here, so a failed batch is re-read on the next run.
    async fn write_batch<W>(
        &self,
        table: &str,
        target: &mut W,
        batch: &RowBatch,
    ) -> Result<(), MigrationError>
    where
        W: RowWriter + ?Sized,
    {
        let max_attempts = self.options.max_batch_retries + 1;
        let mut attempt = 1;

        loop {
            let start_time = Instant::now();

            debug!(
                "Sending batch of {} rows to {} (attempt {}/{})",
                batch.len(),
                table,
                attempt,
                max_attempts
            );

            match target.upsert_batch(table, batch).await {
                Ok(()) => {
                    debug!(
                        "Executed batch of {} rows on {}, took: {}s",
                        batch.len(),
                        table,
                        Instant::now()
                            .saturating_duration_since(start_time)
                            .as_secs_f32()
                    );
                    return Ok(());
                }
                Err(source) if attempt >= max_attempts => {
                    return Err(MigrationError::BatchWrite {
                        table: table.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    let backoff = self.options.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Batch write to {} failed (attempt {}/{}), retrying in {}ms: {}",
                        table,
                        attempt,
                        max_attempts,
                        backoff.as_millis(),
                        err
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
