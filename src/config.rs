use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use toml::Value;

use crate::insert::inserter::DEFAULT_MAX_PACKET_BYTES;
use crate::migrate::migration_options::{
    MigrationOptions, DEFAULT_BATCH_SIZE, DEFAULT_CURSOR_COLUMN, DEFAULT_MAX_BATCH_RETRIES,
};

const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_WATERMARK_FILE: &str = "watermarks.json";

#[derive(Debug)]
pub(crate) struct Config {
    source: DatabaseConfig,
    target: DatabaseConfig,
    settings: SettingsConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct SettingsConfig {
    pub batch_size: usize,
    pub max_batch_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_packet_bytes: usize,
    pub cursor_column: String,
    pub cursor_columns: HashMap<String, String>,
    pub watermark_file: PathBuf,
    pub whitelisted_tables: Vec<String>,
}

impl Config {
    pub(crate) fn from_toml(config: Value) -> Result<Self> {
        let source = parse_database_config(
            config
                .get("source")
                .ok_or(anyhow!("Missing or invalid source database settings"))?,
        )
        .map_err(|err| err.context("Invalid [source] section"))?;
        let target = parse_database_config(
            config
                .get("target")
                .ok_or(anyhow!("Missing or invalid target database settings"))?,
        )
        .map_err(|err| err.context("Invalid [target] section"))?;

        let empty = Value::Table(Default::default());
        let mut settings = parse_settings_config(config.get("settings").unwrap_or(&empty))?;
        settings.cursor_columns =
            parse_cursor_columns(config.get("cursor_columns").unwrap_or(&empty))?;

        Ok(Config {
            source,
            target,
            settings,
        })
    }

    pub fn source(&self) -> &DatabaseConfig {
        &self.source
    }

    pub fn target(&self) -> &DatabaseConfig {
        &self.target
    }

    pub fn settings(&self) -> &SettingsConfig {
        &self.settings
    }
}

impl SettingsConfig {
    pub fn migration_options(&self, max_concurrent_tasks: usize) -> MigrationOptions {
        MigrationOptions {
            batch_size: self.batch_size,
            max_batch_retries: self.max_batch_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_concurrent_tasks,
            cursor_column: self.cursor_column.clone(),
            cursor_columns: self.cursor_columns.clone(),
            whitelisted_tables: self.whitelisted_tables.clone(),
        }
    }
}

fn parse_database_config(config: &Value) -> Result<DatabaseConfig> {
    let host = config
        .get("host")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing or invalid host"))?
        .to_string();

    let port = config
        .get("port")
        .and_then(|value| value.as_integer())
        .ok_or_else(|| anyhow!("Missing or invalid port"))?
        .try_into()?;

    let username = config
        .get("username")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing or invalid username"))?
        .to_string();

    let password = config
        .get("password")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing or invalid password"))?
        .to_string();

    let database = config
        .get("database")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing or invalid database"))?
        .to_string();

    Ok(DatabaseConfig {
        host,
        port,
        username,
        password,
        database,
    })
}

fn optional_positive(config: &Value, key: &str, default: u64) -> Result<u64> {
    match config.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_integer()
            .filter(|value| *value > 0)
            .map(|value| value as u64)
            .ok_or_else(|| anyhow!("Invalid {}, expected a positive integer", key)),
    }
}

fn parse_settings_config(config: &Value) -> Result<SettingsConfig> {
    let batch_size = optional_positive(config, "batch_size", DEFAULT_BATCH_SIZE as u64)? as usize;

    let max_batch_retries = match config.get("max_batch_retries") {
        None => DEFAULT_MAX_BATCH_RETRIES,
        Some(value) => value
            .as_integer()
            .and_then(|value| u32::try_from(value).ok())
            .ok_or_else(|| anyhow!("Invalid max_batch_retries"))?,
    };

    let retry_backoff_ms = optional_positive(config, "retry_backoff_ms", DEFAULT_RETRY_BACKOFF_MS)?;

    let max_packet_bytes =
        optional_positive(config, "max_packet_bytes", DEFAULT_MAX_PACKET_BYTES as u64)? as usize;

    let cursor_column = match config.get("cursor_column") {
        None => DEFAULT_CURSOR_COLUMN.to_string(),
        Some(value) => value
            .as_str()
            .ok_or_else(|| anyhow!("Invalid cursor_column"))?
            .to_string(),
    };

    let watermark_file = match config.get("watermark_file") {
        None => PathBuf::from(DEFAULT_WATERMARK_FILE),
        Some(value) => PathBuf::from(
            value
                .as_str()
                .ok_or_else(|| anyhow!("Invalid watermark_file"))?,
        ),
    };

    let whitelisted_tables = match config.get("whitelisted_tables") {
        None => Vec::new(),
        Some(value) => value
            .as_array()
            .ok_or_else(|| anyhow!("Missing or invalid whitelisted tables"))?
            .iter()
            .filter_map(|value| value.as_str().map(|s| s.to_string()))
            .collect::<Vec<String>>(),
    };

    Ok(SettingsConfig {
        batch_size,
        max_batch_retries,
        retry_backoff_ms,
        max_packet_bytes,
        cursor_column,
        cursor_columns: HashMap::new(),
        watermark_file,
        whitelisted_tables,
    })
}

fn parse_cursor_columns(config: &Value) -> Result<HashMap<String, String>> {
    let table = config
        .as_table()
        .ok_or_else(|| anyhow!("Invalid cursor_columns section"))?;

    table
        .iter()
        .map(|(table, column)| {
            column
                .as_str()
                .map(|column| (table.clone(), column.to_string()))
                .ok_or_else(|| anyhow!("Invalid cursor column for table {}", table))
        })
        .collect()
}
