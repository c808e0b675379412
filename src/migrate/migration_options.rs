use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_BATCH_RETRIES: u32 = 3;
pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_CURSOR_COLUMN: &str = "updated_at";

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub(crate) batch_size: usize,
    pub(crate) max_batch_retries: u32,
    pub(crate) retry_backoff: Duration,
    pub(crate) max_concurrent_tasks: usize,
    pub(crate) cursor_column: String,
    pub(crate) cursor_columns: HashMap<String, String>,
    pub(crate) whitelisted_tables: Vec<String>,
}

impl MigrationOptions {
    pub fn cursor_column_for(&self, table: &str) -> &str {
        self.cursor_columns
            .get(table)
            .map(String::as_str)
            .unwrap_or(&self.cursor_column)
    }

    /// Empty whitelist means every table.
    pub fn is_whitelisted(&self, table: &str) -> bool {
        self.whitelisted_tables.is_empty() || self.whitelisted_tables.iter().any(|t| t == table)
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        MigrationOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_retries: DEFAULT_MAX_BATCH_RETRIES,
            retry_backoff: Duration::from_millis(500),
            max_concurrent_tasks: DEFAULT_PARALLELISM,
            cursor_column: DEFAULT_CURSOR_COLUMN.to_string(),
            cursor_columns: HashMap::new(),
            whitelisted_tables: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_table_cursor_overrides_default() {
        let mut options = MigrationOptions::default();
        options
            .cursor_columns
            .insert("orders".to_string(), "id".to_string());

        assert_eq!(options.cursor_column_for("orders"), "id");
        assert_eq!(options.cursor_column_for("users"), "updated_at");
    }

    #[test]
    fn whitelist() {
        let mut options = MigrationOptions::default();
        assert!(options.is_whitelisted("anything"));

        options.whitelisted_tables = vec!["users".to_string()];
        assert!(options.is_whitelisted("users"));
        assert!(!options.is_whitelisted("orders"));
    }
}
