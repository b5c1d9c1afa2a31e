use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::models::StreamerMapping;
use super::{DatabaseError, StreamerStore};

/// Process-local store used for `memory://` and in tests.
#[derive(Default)]
pub struct MemoryStreamerStore {
    mappings: RwLock<BTreeMap<String, StreamerMapping>>,
    fail_writes: AtomicBool,
}

impl MemoryStreamerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mappings(mappings: impl IntoIterator<Item = StreamerMapping>) -> Self {
        let store = Self::default();
        {
            let mut guard = store.mappings.write();
            for mapping in mappings {
                guard.insert(mapping.source_id.clone(), mapping);
            }
        }
        store
    }

    /// Makes every subsequent write fail, for exercising rollback paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, source_id: &str) -> Option<StreamerMapping> {
        self.mappings.read().get(source_id).cloned()
    }

    fn check_writable(&self) -> Result<(), DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("memory store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamerStore for MemoryStreamerStore {
    async fn load_all(&self) -> Result<Vec<StreamerMapping>, DatabaseError> {
        Ok(self.mappings.read().values().cloned().collect())
    }

    async fn upsert(&self, mapping: &StreamerMapping) -> Result<(), DatabaseError> {
        self.check_writable()?;
        self.mappings
            .write()
            .insert(mapping.source_id.clone(), mapping.clone());
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), DatabaseError> {
        self.check_writable()?;
        self.mappings.write().remove(source_id);
        Ok(())
    }
}
