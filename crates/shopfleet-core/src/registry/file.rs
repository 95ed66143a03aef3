//! File-based storage driver
//!
//! One JSON document per store under `<base_dir>/<name>.json`. Writes go to a
//! temporary sibling first and are renamed into place.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::RegistryStorage;
use crate::error::{Result, StoreError};
use crate::store::{StoreName, StoreRecord};

const EXTENSION: &str = "json";

/// File-based storage driver
pub struct FileDriver {
    base_dir: PathBuf,
}

impl FileDriver {
    /// Create a new file driver, creating `base_dir` if needed
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, name: &StoreName) -> PathBuf {
        self.base_dir.join(format!("{}.{}", name, EXTENSION))
    }

    async fn read_record(path: &Path) -> Result<StoreRecord> {
        let data = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl RegistryStorage for FileDriver {
    async fn load_all(&self) -> Result<Vec<StoreRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e != EXTENSION).unwrap_or(true) {
                continue;
            }

            let record = Self::read_record(&path).await.map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "unreadable store record");
                StoreError::Internal(format!("corrupt store record {}: {}", path.display(), e))
            })?;
            if path.file_stem().and_then(|stem| stem.to_str()) != Some(record.name.as_str()) {
                return Err(StoreError::Internal(format!(
                    "store record {} holds store '{}'",
                    path.display(),
                    record.name
                )));
            }
            records.push(record);
        }

        Ok(records)
    }

    async fn save(&self, record: &StoreRecord) -> Result<()> {
        let path = self.record_path(&record.name);
        let tmp = path.with_extension(format!("{}.tmp", EXTENSION));

        let data = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(())
    }

    async fn delete(&self, name: &StoreName) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
