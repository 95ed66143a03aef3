//! In-memory storage driver
//!
//! Keeps records in memory, counts operations for assertions and can be told
//! to fail writes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::RegistryStorage;
use crate::error::{Result, StoreError};
use crate::store::{StoreName, StoreRecord};

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MemoryDriver {
    records: Arc<Mutex<HashMap<StoreName, StoreRecord>>>,
    operations: Arc<Mutex<OperationCounts>>,
    fail_writes: Arc<AtomicBool>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub loads: usize,
    pub saves: usize,
    pub deletes: usize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated records, as if left by a previous process
    pub fn with_records(records: Vec<StoreRecord>) -> Self {
        let driver = Self::new();
        {
            let mut map = driver.records.lock().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                map.insert(record.name.clone(), record);
            }
        }
        driver
    }

    /// Make every subsequent save/delete fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persisted copy of one record
    pub fn stored(&self, name: &str) -> Option<StoreRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|r| r.name.as_str() == name)
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut self.operations.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::internal("storage unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStorage for MemoryDriver {
    async fn load_all(&self) -> Result<Vec<StoreRecord>> {
        self.count(|c| c.loads += 1);
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn save(&self, record: &StoreRecord) -> Result<()> {
        self.count(|c| c.saves += 1);
        self.check_writable()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, name: &StoreName) -> Result<()> {
        self.count(|c| c.deletes += 1);
        self.check_writable()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StoreCredentials;
    use crate::store::StoreKind;

    fn test_record(name: &str) -> StoreRecord {
        StoreRecord::requested(
            StoreName::parse(name).unwrap(),
            StoreKind::WooCommerce,
            StoreCredentials::generate("admin@example.com"),
        )
    }

    #[tokio::test]
    async fn test_memory_save_and_load() {
        let driver = MemoryDriver::new();
        driver.save(&test_record("shop")).await.unwrap();

        let loaded = driver.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            driver.operation_counts(),
            OperationCounts { loads: 1, saves: 1, deletes: 0 }
        );
    }

    #[tokio::test]
    async fn test_memory_fail_writes() {
        let driver = MemoryDriver::new();
        driver.set_fail_writes(true);

        let result = driver.save(&test_record("shop")).await;
        assert!(matches!(result, Err(StoreError::Internal(_))));
        assert_eq!(driver.record_count(), 0);

        driver.set_fail_writes(false);
        driver.save(&test_record("shop")).await.unwrap();
        assert_eq!(driver.record_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_with_records() {
        let driver = MemoryDriver::with_records(vec![test_record("a"), test_record("b")]);
        assert_eq!(driver.record_count(), 2);
        assert!(driver.stored("a").is_some());

        driver.delete(&StoreName::parse("a").unwrap()).await.unwrap();
        assert!(driver.stored("a").is_none());
    }
}
