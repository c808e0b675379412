use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Acquire, Executor, MySql, MySqlPool};

use crate::common::rows::RowBatch;
use crate::common::schema::{ForeignKey, ForeignKeyColumn};
use crate::database::{ConnectionProvider, Introspect, RowWriter};
use crate::insert::query::{build_delete_query, build_upsert_statements};

pub const DEFAULT_MAX_PACKET_BYTES: usize = 4 * 1024 * 1024;

/// Pooled MySQL target. Every `connect` leases a connection of its own.
#[derive(Clone)]
pub struct DatabaseInserter {
    pool: MySqlPool,
    max_packet_bytes: usize,
}

impl DatabaseInserter {
    pub fn new(pool: MySqlPool) -> Self {
        DatabaseInserter {
            pool,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
        }
    }

    pub fn with_max_packet_bytes(mut self, max_packet_bytes: usize) -> Self {
        self.max_packet_bytes = max_packet_bytes;
        self
    }

    pub async fn get_max_allowed_packet(&self) -> Result<usize> {
        let query = "SELECT @@max_allowed_packet";

        let max_allowed_packet: u64 = sqlx::query_scalar(query).fetch_one(&self.pool).await?;

        Ok(max_allowed_packet as usize)
    }
}

#[async_trait]
impl ConnectionProvider for DatabaseInserter {
    type Connection = InserterConnection;

    async fn connect(&self) -> Result<InserterConnection> {
        let conn = self
            .pool
            .acquire()
            .await
            .context("Failed to lease MySQL connection")?;

        Ok(InserterConnection {
            conn,
            max_packet_bytes: self.max_packet_bytes,
        })
    }
}

pub struct InserterConnection {
    conn: PoolConnection<MySql>,
    max_packet_bytes: usize,
}

impl InserterConnection {
    async fn fetch_names(&mut self, table_type: &str) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = ?",
        )
        .bind(table_type)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(names)
    }

    /// Runs `statements` in one transaction with foreign key checks disabled,
    /// so parent and child tables can be loaded in any order.
    async fn execute_transactional_queries(&mut self, statements: &[String]) -> Result<()> {
        let result = self.run_in_transaction(statements).await;

        // Session variable, a rollback does not restore it
        let restored = (&mut *self.conn)
            .execute("SET FOREIGN_KEY_CHECKS=1")
            .await
            .context("Failed to re-enable foreign key checks");

        result?;
        restored?;
        Ok(())
    }

    async fn run_in_transaction(&mut self, statements: &[String]) -> Result<()> {
        let mut transaction = self.conn.begin().await?;

        transaction.execute("SET FOREIGN_KEY_CHECKS=0").await?;

        for query in statements {
            if let Err(err) = transaction.execute(query.as_str()).await {
                transaction.rollback().await?;
                let preview: String = query.chars().take(100).collect();
                return Err(anyhow!(err))
                    .with_context(|| format!("Cannot execute transaction query: {}", preview));
            }
        }

        transaction.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Introspect for InserterConnection {
    async fn ping(&mut self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&mut *self.conn).await?;
        Ok(())
    }

    async fn tables(&mut self) -> Result<Vec<String>> {
        self.fetch_names("BASE TABLE").await
    }

    async fn views(&mut self) -> Result<Vec<String>> {
        self.fetch_names("VIEW").await
    }

    async fn foreign_keys(&mut self) -> Result<Vec<ForeignKeyColumn>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT CAST(table_name AS CHAR), CAST(column_name AS CHAR), \
                    CAST(referenced_table_name AS CHAR), CAST(referenced_column_name AS CHAR) \
             FROM information_schema.key_column_usage \
             WHERE table_schema = DATABASE() AND referenced_table_name IS NOT NULL \
             ORDER BY table_name, constraint_name, ordinal_position",
        )
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(table, column, referenced_table, referenced_column)| ForeignKeyColumn {
                    table,
                    foreign_key: ForeignKey {
                        column,
                        referenced_table,
                        referenced_column,
                    },
                },
            )
            .collect())
    }
}

#[async_trait]
impl RowWriter for InserterConnection {
    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(count > 0)
    }

    async fn upsert_batch(&mut self, table: &str, batch: &RowBatch) -> Result<()> {
        let statements = build_upsert_statements(table, batch, self.max_packet_bytes)?;

        debug!(
            "Sending {} rows to {} in {} statements",
            batch.len(),
            table,
            statements.len()
        );

        self.execute_transactional_queries(&statements)
            .await
            .with_context(|| format!("Failed to upsert batch into {}", table))
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        let mut transaction = self.conn.begin().await?;

        let result = transaction
            .execute(build_delete_query(table).as_str())
            .await
            .with_context(|| format!("Failed to delete rows from {}", table))?;

        transaction.commit().await?;

        Ok(result.rows_affected())
    }
}
