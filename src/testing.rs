//! In-memory database used by the unit tests as both source and target.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::common::cursor::CursorValue;
use crate::common::rows::{Row, RowBatch};
use crate::common::schema::{ForeignKey, ForeignKeyColumn};
use crate::database::{ConnectionProvider, Introspect, RowReader, RowWriter};

#[derive(Default)]
struct MemoryTable {
    columns: Vec<String>,
    // Keyed by the first column, which plays the primary key
    rows: BTreeMap<String, Row>,
}

struct WriteFailure {
    table: String,
    cursor: CursorValue,
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    views: BTreeSet<String>,
    foreign_keys: Vec<ForeignKeyColumn>,
    unreachable: bool,
    broken_metadata: bool,
    write_failures: Vec<WriteFailure>,
    failing_deletes: BTreeSet<String>,
    panicking_reads: BTreeSet<String>,
    cancel_after_writes: Vec<(String, usize, CancellationToken)>,
    fetch_delay: Duration,
    fetches_in_flight: usize,
    peak_fetches_in_flight: usize,
    write_attempts: BTreeMap<String, usize>,
    committed_writes: BTreeMap<String, usize>,
    deletes: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_table(self, table: &str, columns: &[&str]) -> Self {
        self.state().tables.insert(
            table.to_string(),
            MemoryTable {
                columns: columns.iter().map(|column| column.to_string()).collect(),
                rows: BTreeMap::new(),
            },
        );
        self
    }

    pub fn with_view(self, view: &str) -> Self {
        self.state().views.insert(view.to_string());
        self
    }

    pub fn with_foreign_key(self, table: &str, column: &str, referenced_table: &str) -> Self {
        self.state().foreign_keys.push(ForeignKeyColumn {
            table: table.to_string(),
            foreign_key: ForeignKey {
                column: column.to_string(),
                referenced_table: referenced_table.to_string(),
                referenced_column: "id".to_string(),
            },
        });
        self
    }

    /// Fills `table` with rows whose id and cursor run from `first` to `last`.
    pub fn with_ordinal_rows(self, table: &str, first: i64, last: i64) -> Self {
        {
            let mut state = self.state();
            let entry = state.tables.entry(table.to_string()).or_default();
            for id in first..=last {
                entry.rows.insert(
                    id.to_string(),
                    Row {
                        cursor: CursorValue::Ordinal(id),
                        values: vec![id.to_string(), format!("'{}-{}'", table, id)],
                    },
                );
            }
        }
        self
    }

    pub fn insert_row(&self, table: &str, row: Row) {
        let mut state = self.state();
        let entry = state.tables.entry(table.to_string()).or_default();
        entry.rows.insert(row.values[0].clone(), row);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn break_metadata(&self) {
        self.state().broken_metadata = true;
    }

    /// Makes every upsert into `table` whose batch contains `cursor` fail.
    /// `times = None` fails forever.
    pub fn fail_writes_containing(&self, table: &str, cursor: CursorValue, times: Option<u32>) {
        self.state().write_failures.push(WriteFailure {
            table: table.to_string(),
            cursor,
            remaining: times,
        });
    }

    pub fn fail_deletes(&self, table: &str) {
        self.state().failing_deletes.insert(table.to_string());
    }

    /// Any fetch from `table` panics.
    pub fn panic_on_fetch(&self, table: &str) {
        self.state().panicking_reads.insert(table.to_string());
    }

    /// Cancels `token` once `writes` batches of `table` have been committed.
    pub fn cancel_after_writes(&self, table: &str, writes: usize, token: CancellationToken) {
        self.state()
            .cancel_after_writes
            .push((table.to_string(), writes, token));
    }

    /// Every fetch takes at least `delay`, so concurrent readers overlap.
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        self.state().fetch_delay = delay;
        self
    }

    /// Highest number of fetches that were running at the same time.
    pub fn peak_fetches_in_flight(&self) -> usize {
        self.state().peak_fetches_in_flight
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state()
            .tables
            .get(table)
            .map(|entry| entry.rows.len())
            .unwrap_or(0)
    }

    /// Cursor values stored in `table`, in ascending cursor order.
    pub fn cursors(&self, table: &str) -> Vec<CursorValue> {
        let mut cursors: Vec<CursorValue> = self
            .state()
            .tables
            .get(table)
            .map(|entry| entry.rows.values().map(|row| row.cursor.clone()).collect())
            .unwrap_or_default();
        cursors.sort();
        cursors
    }

    pub fn write_attempts(&self, table: &str) -> usize {
        self.state().write_attempts.get(table).copied().unwrap_or(0)
    }

    pub fn committed_writes(&self, table: &str) -> usize {
        self.state().committed_writes.get(table).copied().unwrap_or(0)
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state().deletes.clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state().unreachable {
            bail!("Connection refused");
        }
        Ok(())
    }

    fn check_metadata(&self) -> Result<()> {
        self.check_reachable()?;
        if self.state().broken_metadata {
            bail!("Permission denied on metadata catalog");
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionProvider for MemoryDatabase {
    type Connection = MemoryDatabase;

    async fn connect(&self) -> Result<Self::Connection> {
        self.check_reachable()?;
        Ok(self.clone())
    }
}

#[async_trait]
impl Introspect for MemoryDatabase {
    async fn ping(&mut self) -> Result<()> {
        self.check_reachable()
    }

    async fn tables(&mut self) -> Result<Vec<String>> {
        self.check_metadata()?;
        Ok(self.state().tables.keys().cloned().collect())
    }

    async fn views(&mut self) -> Result<Vec<String>> {
        self.check_metadata()?;
        Ok(self.state().views.iter().cloned().collect())
    }

    async fn foreign_keys(&mut self) -> Result<Vec<ForeignKeyColumn>> {
        self.check_metadata()?;
        Ok(self.state().foreign_keys.clone())
    }
}

#[async_trait]
impl RowReader for MemoryDatabase {
    async fn fetch_batch(
        &mut self,
        table: &str,
        _cursor_column: &str,
        after: Option<&CursorValue>,
        limit: usize,
    ) -> Result<RowBatch> {
        self.check_reachable()?;

        let delay = {
            let mut state = self.state();
            if state.panicking_reads.contains(table) {
                drop(state);
                panic!("reader for {} crashed", table);
            }
            state.fetches_in_flight += 1;
            state.peak_fetches_in_flight =
                state.peak_fetches_in_flight.max(state.fetches_in_flight);
            state.fetch_delay
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = self.state();
        state.fetches_in_flight -= 1;
        let entry = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Invalid object name '{}'", table))?;

        let mut rows: Vec<Row> = entry
            .rows
            .values()
            .filter(|row| after.map_or(true, |after| &row.cursor > after))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.cursor.cmp(&b.cursor));
        rows.truncate(limit);

        Ok(RowBatch {
            columns: entry.columns.clone(),
            rows,
        })
    }
}

#[async_trait]
impl RowWriter for MemoryDatabase {
    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.state().tables.contains_key(table))
    }

    async fn upsert_batch(&mut self, table: &str, batch: &RowBatch) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state();
        *state.write_attempts.entry(table.to_string()).or_insert(0) += 1;

        let failure = state.write_failures.iter_mut().find(|failure| {
            failure.table == table
                && failure.remaining != Some(0)
                && batch.rows.iter().any(|row| row.cursor == failure.cursor)
        });
        if let Some(failure) = failure {
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }
            bail!("Deadlock found when trying to get lock");
        }

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;
        for row in &batch.rows {
            entry.rows.insert(row.values[0].clone(), row.clone());
        }
        let committed = state.committed_writes.entry(table.to_string()).or_insert(0);
        *committed += 1;
        let committed = *committed;

        for (_, _, token) in state
            .cancel_after_writes
            .iter()
            .filter(|(target, writes, _)| target == table && *writes == committed)
        {
            token.cancel();
        }

        Ok(())
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        self.check_reachable()?;
        let mut state = self.state();
        if state.failing_deletes.contains(table) {
            bail!("Cannot delete or update a parent row: a foreign key constraint fails");
        }

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;
        let deleted = entry.rows.len() as u64;
        entry.rows.clear();
        state.deletes.push(table.to_string());

        Ok(deleted)
    }
}
