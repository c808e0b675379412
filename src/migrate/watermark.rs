use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::common::cursor::CursorValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationWatermark {
    pub table: String,
    pub cursor_value: CursorValue,
    pub updated_at: DateTime<Utc>,
}

/// Last committed cursor per table.
///
/// A reader never observes a partially written watermark: `get` returns
/// either the previous or the new value of a concurrent `commit`.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, table: &str) -> Result<Option<MigrationWatermark>>;

    async fn commit(&self, table: &str, cursor_value: CursorValue) -> Result<MigrationWatermark>;

    async fn reset(&self, table: &str) -> Result<()>;
}

/// Keeps every table's watermark in one JSON file, rewritten on each commit.
pub struct FileWatermarkStore {
    path: PathBuf,
    watermarks: RwLock<BTreeMap<String, MigrationWatermark>>,
}

impl FileWatermarkStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let watermarks = match fs::read(&path).await {
            Ok(content) => serde_json::from_slice(&content).with_context(|| {
                format!("Watermark file {} is corrupted", path.display())
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No watermark file at {}, starting fresh", path.display());
                BTreeMap::new()
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read watermark file {}", path.display())
                })
            }
        };

        Ok(FileWatermarkStore {
            path,
            watermarks: RwLock::new(watermarks),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, watermarks: &BTreeMap<String, MigrationWatermark>) -> Result<()> {
        let content = serde_json::to_vec_pretty(watermarks)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        // Rename is atomic, the file on disk is always a complete document
        fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, table: &str) -> Result<Option<MigrationWatermark>> {
        Ok(self.watermarks.read().await.get(table).cloned())
    }

    async fn commit(&self, table: &str, cursor_value: CursorValue) -> Result<MigrationWatermark> {
        let watermark = MigrationWatermark {
            table: table.to_string(),
            cursor_value,
            updated_at: Utc::now(),
        };

        // Readers are held off until the file and the map agree
        let mut watermarks = self.watermarks.write().await;
        let mut updated = watermarks.clone();
        updated.insert(table.to_string(), watermark.clone());

        self.persist(&updated).await?;
        *watermarks = updated;

        Ok(watermark)
    }

    async fn reset(&self, table: &str) -> Result<()> {
        let mut watermarks = self.watermarks.write().await;
        if !watermarks.contains_key(table) {
            return Ok(());
        }

        let mut updated = watermarks.clone();
        updated.remove(table);

        self.persist(&updated).await?;
        *watermarks = updated;

        Ok(())
    }
}

/// Non-persistent store, for runs that must always copy every row.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    watermarks: RwLock<BTreeMap<String, MigrationWatermark>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, table: &str) -> Result<Option<MigrationWatermark>> {
        Ok(self.watermarks.read().await.get(table).cloned())
    }

    async fn commit(&self, table: &str, cursor_value: CursorValue) -> Result<MigrationWatermark> {
        let watermark = MigrationWatermark {
            table: table.to_string(),
            cursor_value,
            updated_at: Utc::now(),
        };
        self.watermarks
            .write()
            .await
            .insert(table.to_string(), watermark.clone());
        Ok(watermark)
    }

    async fn reset(&self, table: &str) -> Result<()> {
        self.watermarks.write().await.remove(table);
        Ok(())
    }
}
