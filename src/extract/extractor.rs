use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_tiberius::ConnectionManager;
use chrono::Timelike;

use crate::common::cursor::CursorValue;
use crate::common::rows::{Row, RowBatch};
use crate::common::schema::{ForeignKey, ForeignKeyColumn};
use crate::database::{ConnectionProvider, Introspect, RowReader};
use crate::extract::format::{cursor_value, format_column_value};

const FOREIGN_KEYS_QUERY: &str = "SELECT
        tp.name AS TABLE_NAME,
        cp.name AS COLUMN_NAME,
        tr.name AS REFERENCED_TABLE_NAME,
        cr.name AS REFERENCED_COLUMN_NAME
    FROM sys.foreign_key_columns fkc
    JOIN sys.tables tp ON fkc.parent_object_id = tp.object_id
    JOIN sys.columns cp ON fkc.parent_object_id = cp.object_id AND fkc.parent_column_id = cp.column_id
    JOIN sys.tables tr ON fkc.referenced_object_id = tr.object_id
    JOIN sys.columns cr ON fkc.referenced_object_id = cr.object_id AND fkc.referenced_column_id = cr.column_id
    ORDER BY tp.name, fkc.constraint_object_id, fkc.constraint_column_id";

/// Pooled MSSQL source. Every `connect` leases a connection of its own.
#[derive(Clone)]
pub struct DatabaseExtractor {
    pub pool: Pool<ConnectionManager>,
}

impl DatabaseExtractor {
    pub fn new(pool: Pool<ConnectionManager>) -> Self {
        DatabaseExtractor { pool }
    }
}

#[async_trait]
impl ConnectionProvider for DatabaseExtractor {
    type Connection = ExtractorConnection;

    async fn connect(&self) -> Result<ExtractorConnection> {
        let conn = self
            .pool
            .get_owned()
            .await
            .context("Failed to lease MSSQL connection")?;
        Ok(ExtractorConnection { conn })
    }
}

pub struct ExtractorConnection {
    conn: PooledConnection<'static, ConnectionManager>,
}

impl ExtractorConnection {
    async fn fetch_names(&mut self, query: &str) -> Result<Vec<String>> {
        let rows = self
            .conn
            .simple_query(query)
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| {
                let name: Option<&str> = row.get(0);
                match name {
                    Some(name) => Ok(name.to_owned()),
                    None => Err(anyhow!("Failed to retrieve object name")),
                }
            })
            .collect()
    }
}

#[async_trait]
impl Introspect for ExtractorConnection {
    async fn ping(&mut self) -> Result<()> {
        self.conn.simple_query("SELECT 1").await?.into_results().await?;
        Ok(())
    }

    async fn tables(&mut self) -> Result<Vec<String>> {
        self.fetch_names(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE'",
        )
        .await
    }

    async fn views(&mut self) -> Result<Vec<String>> {
        self.fetch_names("SELECT TABLE_NAME FROM INFORMATION_SCHEMA.VIEWS")
            .await
    }

    async fn foreign_keys(&mut self) -> Result<Vec<ForeignKeyColumn>> {
        let rows = self
            .conn
            .simple_query(FOREIGN_KEYS_QUERY)
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| {
                let text = |index: usize| -> Result<String> {
                    row.try_get::<&str, _>(index)?
                        .map(str::to_owned)
                        .ok_or_else(|| anyhow!("Unexpected NULL in foreign key metadata"))
                };

                Ok(ForeignKeyColumn {
                    table: text(0)?,
                    foreign_key: ForeignKey {
                        column: text(1)?,
                        referenced_table: text(2)?,
                        referenced_column: text(3)?,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl RowReader for ExtractorConnection {
    async fn fetch_batch(
        &mut self,
        table: &str,
        cursor_column: &str,
        after: Option<&CursorValue>,
        limit: usize,
    ) -> Result<RowBatch> {
        let query = build_batch_query(table, cursor_column, after, limit);

        let rows = self
            .conn
            .simple_query(query)
            .await?
            .into_first_result()
            .await?;

        let Some(first) = rows.first() else {
            return Ok(RowBatch::default());
        };

        let columns: Vec<String> = first
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        let cursor_index = columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(cursor_column))
            .ok_or_else(|| anyhow!("Cursor column {} not found in {}", cursor_column, table))?;

        let rows = rows
            .into_iter()
            .map(|row| {
                let values: Vec<_> = row.into_iter().collect();
                let cursor = cursor_value(&values[cursor_index]).ok_or_else(|| {
                    anyhow!(
                        "Column {}.{} is NULL or not an integer/date type",
                        table,
                        cursor_column
                    )
                })?;

                Ok(Row {
                    cursor,
                    values: values.iter().map(format_column_value).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RowBatch { columns, rows })
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Timestamps are compared as DATETIME2(7), which holds every MSSQL date/time
/// type without rounding.
fn cursor_literal(value: &CursorValue) -> String {
    match value {
        CursorValue::Ordinal(value) => value.to_string(),
        CursorValue::Timestamp(value) => format!(
            "CAST('{}.{:07}' AS DATETIME2(7))",
            value.format("%Y-%m-%d %H:%M:%S"),
            value.nanosecond() / 100
        ),
    }
}

pub fn build_batch_query(
    table: &str,
    cursor_column: &str,
    after: Option<&CursorValue>,
    limit: usize,
) -> String {
    let cursor_column = quote_identifier(cursor_column);
    let filter = after
        .map(|after| format!(" WHERE {} > {}", cursor_column, cursor_literal(after)))
        .unwrap_or_default();

    format!(
        "SELECT TOP ({}) * FROM {}{} ORDER BY {} ASC",
        limit,
        quote_identifier(table),
        filter,
        cursor_column
    )
}
