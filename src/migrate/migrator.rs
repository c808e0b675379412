use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::spawn;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::helpers::flatten_error_chain;
use crate::common::schema::SchemaSnapshot;
use crate::database::{ConnectionProvider, RowReader, RowWriter};
use crate::error::{MigrationError, Side};
use crate::migrate::batch_migrator::BatchMigrator;
use crate::migrate::inspector::SchemaInspector;
use crate::migrate::migration_options::MigrationOptions;
use crate::migrate::migration_result::{MigrationRecord, MigrationReport, MigrationStatus};
use crate::migrate::rollback::{RollbackCoordinator, RollbackSummary};
use crate::migrate::validator::CompatibilityValidator;
use crate::migrate::watermark::WatermarkStore;
use crate::report::{Notifier, ReportSink};

/// Runs a whole migration: snapshot both schemas, veto incompatible pairs,
/// then copy every table on its own pair of connections.
pub struct MigrationCoordinator<S, T> {
    source: Arc<S>,
    target: Arc<T>,
    watermarks: Arc<dyn WatermarkStore>,
    sink: Option<Arc<dyn ReportSink>>,
    notifier: Option<Arc<dyn Notifier>>,
    options: MigrationOptions,
}

impl<S, T> MigrationCoordinator<S, T>
where
    S: ConnectionProvider,
    S::Connection: RowReader,
    T: ConnectionProvider,
    T::Connection: RowWriter,
{
    pub fn new(
        source: S,
        target: T,
        watermarks: Arc<dyn WatermarkStore>,
        options: MigrationOptions,
    ) -> Self {
        MigrationCoordinator {
            source: Arc::new(source),
            target: Arc::new(target),
            watermarks,
            sink: None,
            notifier: None,
            options,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn migrate(&self, cancel: &CancellationToken) -> Result<MigrationReport, MigrationError> {
        info!("Running table migrator");

        let start_time = Instant::now();

        let source_snapshot = self.capture_source().await?;
        let target_snapshot = self.capture_target().await?;

        let compatibility = CompatibilityValidator::validate(&source_snapshot, &target_snapshot);

        let mut report = MigrationReport {
            timestamp: Utc::now(),
            source_snapshot,
            target_snapshot,
            compatibility: Some(compatibility.clone()),
            records: Vec::new(),
            aborted: false,
        };

        if !compatibility.overall_compatible {
            error!(
                "Schema incompatibility detected, no data copied: {}",
                compatibility.summary()
            );
            report.aborted = true;
            self.finish(&report).await?;
            return Ok(report);
        }

        let tables = self.tables_to_migrate(&report.source_snapshot);

        if tables.is_empty() {
            warn!("No tables to process");
        } else {
            info!("Tables to migrate: {}", tables.join(", "));
        }

        report.records = self.run_migration(tables, cancel).await;
        // Only a table that stopped early makes the run aborted
        report.aborted = report
            .records
            .iter()
            .any(|record| record.status == MigrationStatus::Skipped);

        info!(
            "Migration finished, total time took: {}s",
            Instant::now()
                .saturating_duration_since(start_time)
                .as_secs_f32()
        );

        self.finish(&report).await?;

        Ok(report)
    }

    /// Empties every table the report marks as migrated, newest first.
    pub async fn rollback(&self, report: &MigrationReport) -> Result<RollbackSummary, MigrationError> {
        let mut conn = self
            .target
            .connect()
            .await
            .map_err(|source| MigrationError::Connection {
                side: Side::Target,
                source,
            })?;

        let summary = RollbackCoordinator::with_watermarks(self.watermarks.clone())
            .rollback(report, &mut conn)
            .await?;

        info!("Rollback completed, tables emptied: {}", summary.rolled_back.len());

        Ok(summary)
    }

    async fn capture_source(&self) -> Result<SchemaSnapshot, MigrationError> {
        let mut conn = self
            .source
            .connect()
            .await
            .map_err(|source| MigrationError::Connection {
                side: Side::Source,
                source,
            })?;
        SchemaInspector::capture(&mut conn, Side::Source).await
    }

    async fn capture_target(&self) -> Result<SchemaSnapshot, MigrationError> {
        let mut conn = self
            .target
            .connect()
            .await
            .map_err(|source| MigrationError::Connection {
                side: Side::Target,
                source,
            })?;
        SchemaInspector::capture(&mut conn, Side::Target).await
    }

    fn tables_to_migrate(&self, snapshot: &SchemaSnapshot) -> Vec<String> {
        check_missing_tables(snapshot, &self.options.whitelisted_tables);

        snapshot
            .dependency_order()
            .into_iter()
            .filter(|table| self.options.is_whitelisted(table))
            .collect()
    }

    async fn run_migration(
        &self,
        tables: Vec<String>,
        cancel: &CancellationToken,
    ) -> Vec<MigrationRecord> {
        // Limits how many tables hold a pair of connections at once
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_tasks.max(1)));
        let migrator = Arc::new(BatchMigrator::new(
            self.watermarks.clone(),
            self.options.clone(),
        ));

        let mut migration_tasks = Vec::with_capacity(tables.len());

        for table in &tables {
            let semaphore = Arc::clone(&semaphore);
            let migrator = Arc::clone(&migrator);
            let source = Arc::clone(&self.source);
            let target = Arc::clone(&self.target);
            let cancel = cancel.clone();
            let table = table.clone();

            let task = spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return MigrationRecord::skipped(&table, 0);
                };

                if cancel.is_cancelled() {
                    return MigrationRecord::skipped(&table, 0);
                }

                let connections = async {
                    let source_conn = source.connect().await.map_err(|source| {
                        MigrationError::Connection {
                            side: Side::Source,
                            source,
                        }
                    })?;
                    let target_conn = target.connect().await.map_err(|source| {
                        MigrationError::Connection {
                            side: Side::Target,
                            source,
                        }
                    })?;
                    Ok::<_, MigrationError>((source_conn, target_conn))
                };

                match connections.await {
                    Ok((mut source_conn, mut target_conn)) => {
                        migrator
                            .run(&table, &mut source_conn, &mut target_conn, &cancel)
                            .await
                    }
                    Err(err) => {
                        let err = anyhow::Error::from(err);
                        error!("Table {} not started: {}", table, flatten_error_chain(&err));
                        MigrationRecord::failed(&table, 0, flatten_error_chain(&err))
                    }
                }
            });

            migration_tasks.push(task);
        }

        // One slot per table, in dispatch order
        join_all(migration_tasks)
            .await
            .into_iter()
            .zip(tables)
            .map(|(joined, table)| {
                joined.unwrap_or_else(|err| {
                    error!("Worker for table {} crashed: {}", table, err);
                    MigrationRecord::failed(&table, 0, format!("Worker crashed: {}", err))
                })
            })
            .collect()
    }

    async fn finish(&self, report: &MigrationReport) -> Result<(), MigrationError> {
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.notify(report.outcome(), report).await {
                warn!("Failed to send {} notification: {:#}", report.outcome(), err);
            }
        }

        if let Some(sink) = &self.sink {
            sink.persist(report)
                .await
                .map_err(|source| MigrationError::Report {
                    report: Box::new(report.clone()),
                    source,
                })?;
        }

        Ok(())
    }
}

fn check_missing_tables(snapshot: &SchemaSnapshot, whitelisted_tables: &[String]) {
    let missing_tables: Vec<_> = whitelisted_tables
        .iter()
        .filter(|table| !snapshot.tables.contains(*table))
        .cloned()
        .collect();

    if !missing_tables.is_empty() {
        warn!(
            "The following whitelisted tables were not found in the database: {}",
            missing_tables.join(", ")
        );
    }
}
