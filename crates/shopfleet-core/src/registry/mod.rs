//! Durable store registry
//!
//! The registry is the single source of truth for store records. Reads are
//! served from an in-memory snapshot and never wait on storage I/O; writes
//! are serialized per store and persisted before they become visible.

mod file;
mod mock;

pub use file::FileDriver;
pub use mock::{MemoryDriver, OperationCounts};

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::store::{StoreName, StoreRecord, StoreStatus};

/// Persistence backend for store records
#[async_trait]
pub trait RegistryStorage: Send + Sync {
    /// Load every persisted record, in no particular order
    async fn load_all(&self) -> Result<Vec<StoreRecord>>;

    /// Create or replace the record for `record.name`
    async fn save(&self, record: &StoreRecord) -> Result<()>;

    /// Remove the record for `name`; removing a missing record is not an error
    async fn delete(&self, name: &StoreName) -> Result<()>;
}

struct Slot {
    writer: Mutex<()>,
    current: RwLock<StoreRecord>,
    removed: AtomicBool,
}

impl Slot {
    fn new(record: StoreRecord) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(()),
            current: RwLock::new(record),
            removed: AtomicBool::new(false),
        })
    }

    fn snapshot(&self) -> StoreRecord {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, record: StoreRecord) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = record;
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

/// Registry of store records keyed by name, in creation order
pub struct StoreRegistry {
    storage: Arc<dyn RegistryStorage>,
    slots: RwLock<IndexMap<StoreName, Arc<Slot>>>,
}

impl StoreRegistry {
    /// Create an empty registry on top of `storage`
    pub fn new(storage: Arc<dyn RegistryStorage>) -> Self {
        Self {
            storage,
            slots: RwLock::new(IndexMap::new()),
        }
    }

    /// Create a registry and load every persisted record
    pub async fn open(storage: Arc<dyn RegistryStorage>) -> Result<Self> {
        let registry = Self::new(storage);
        registry.load().await?;
        Ok(registry)
    }

    /// Replace the in-memory view with what storage holds
    pub async fn load(&self) -> Result<usize> {
        let mut records = self.storage.load_all().await?;
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });

        let count = records.len();
        let mut slots = self.write_slots();
        slots.clear();
        for record in records {
            slots.insert(record.name.clone(), Slot::new(record));
        }

        tracing::debug!(count, "loaded store records");
        Ok(count)
    }

    /// Snapshot of one record
    pub fn get(&self, name: &StoreName) -> Option<StoreRecord> {
        self.slot(name).map(|slot| slot.snapshot())
    }

    pub fn contains(&self, name: &StoreName) -> bool {
        self.slot(name).is_some()
    }

    /// Snapshot of every record in creation order
    pub fn list(&self) -> Vec<StoreRecord> {
        let slots: Vec<Arc<Slot>> = self.read_slots().values().cloned().collect();
        slots.iter().map(|slot| slot.snapshot()).collect()
    }

    /// Records currently in `status`
    pub fn with_status(&self, status: StoreStatus) -> Vec<StoreRecord> {
        self.list()
            .into_iter()
            .filter(|r| r.status == status)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a record
    ///
    /// Replacing a record with a different id (a fresh create over a failed
    /// store) moves it to the end of the creation order.
    pub async fn upsert(&self, record: StoreRecord) -> Result<StoreRecord> {
        let existing = self.slot(&record.name).filter(|slot| !slot.is_removed());

        match existing {
            Some(slot) => {
                let _writer = slot.writer.lock().await;
                if slot.is_removed() {
                    drop(_writer);
                    return self.insert_new(record).await;
                }

                self.storage.save(&record).await?;
                let moved = slot.snapshot().id != record.id;
                slot.replace(record.clone());

                if moved {
                    let mut slots = self.write_slots();
                    if let Some(current) = slots.shift_remove(&record.name) {
                        slots.insert(record.name.clone(), current);
                    }
                }
                Ok(record)
            }
            None => self.insert_new(record).await,
        }
    }

    async fn insert_new(&self, record: StoreRecord) -> Result<StoreRecord> {
        self.storage.save(&record).await?;
        let mut slots = self.write_slots();
        slots.shift_remove(&record.name);
        slots.insert(record.name.clone(), Slot::new(record.clone()));
        Ok(record)
    }

    /// Apply `f` to a copy of the record and persist it
    ///
    /// The change becomes visible only once storage accepted it. If `f` or
    /// the save fails, the record is left untouched.
    pub async fn update<F>(&self, name: &StoreName, f: F) -> Result<StoreRecord>
    where
        F: FnOnce(&mut StoreRecord) -> Result<()>,
    {
        let slot = self
            .slot(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let _writer = slot.writer.lock().await;
        if slot.is_removed() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        let mut draft = slot.snapshot();
        f(&mut draft)?;

        self.storage.save(&draft).await.map_err(|e| {
            tracing::error!(store = %name, error = %e, "failed to persist store record");
            StoreError::internal(format!("failed to persist store '{}': {}", name, e))
        })?;

        slot.replace(draft.clone());
        Ok(draft)
    }

    /// Remove a record from storage and from the registry
    pub async fn remove(&self, name: &StoreName) -> Result<()> {
        let Some(slot) = self.slot(name) else {
            return Err(StoreError::NotFound(name.to_string()));
        };

        let _writer = slot.writer.lock().await;
        if slot.is_removed() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        self.storage.delete(name).await?;
        slot.removed.store(true, Ordering::SeqCst);

        let mut slots = self.write_slots();
        if slots.get(name).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            slots.shift_remove(name);
        }
        Ok(())
    }

    fn slot(&self, name: &StoreName) -> Option<Arc<Slot>> {
        self.read_slots().get(name).cloned()
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<StoreName, Arc<Slot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<StoreName, Arc<Slot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
