//! Seams between the migration core and concrete database drivers.
//!
//! The core only ever talks to a leased connection through these traits;
//! `extract` implements the reading side for MSSQL and `insert` the writing
//! side for MySQL.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::cursor::CursorValue;
use crate::common::rows::RowBatch;
use crate::common::schema::ForeignKeyColumn;

/// Hands out connections. Every call returns a connection that is not shared
/// with any other caller.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection>;
}

/// Read-only metadata queries.
#[async_trait]
pub trait Introspect: Send {
    /// Cheap round trip proving the database is reachable.
    async fn ping(&mut self) -> Result<()>;

    async fn tables(&mut self) -> Result<Vec<String>>;

    async fn views(&mut self) -> Result<Vec<String>>;

    async fn foreign_keys(&mut self) -> Result<Vec<ForeignKeyColumn>>;
}

#[async_trait]
pub trait RowReader: Introspect {
    /// Returns at most `limit` rows with `cursor_column > after` (all rows when
    /// `after` is `None`), ordered by `cursor_column` ascending.
    async fn fetch_batch(
        &mut self,
        table: &str,
        cursor_column: &str,
        after: Option<&CursorValue>,
        limit: usize,
    ) -> Result<RowBatch>;
}

#[async_trait]
pub trait RowWriter: Introspect {
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Writes the whole batch in one transaction, replacing rows that share a
    /// primary key. Either every row is visible afterwards or none is.
    async fn upsert_batch(&mut self, table: &str, batch: &RowBatch) -> Result<()>;

    /// Deletes every row of `table`, returning the number of rows removed.
    async fn delete_all(&mut self, table: &str) -> Result<u64>;
}
