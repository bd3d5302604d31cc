//! In-memory fake for the build-result store (testing and single-process use)

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Build-result store backed by a `HashMap<id, record>`.
#[derive(Debug, Default)]
pub struct MemoryBuildResultStore {
    records: Mutex<HashMap<String, RepoBuildRecord>>,
    saves: Mutex<Vec<RepoBuildStatus>>,
}

impl MemoryBuildResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, RepoBuildRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every status written through `save`, in order.
    pub fn saved_statuses(&self) -> Vec<RepoBuildStatus> {
        self.saves.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl BuildResultStore for MemoryBuildResultStore {
    async fn create(&self, record: &RepoBuildRecord) -> StorageResult<()> {
        let mut records = self.records();
        if records.contains_key(record.id.as_str()) {
            return Err(StorageError::Duplicate {
                id: record.id.0.clone(),
            });
        }
        records.insert(record.id.0.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &RepoBuildId) -> StorageResult<RepoBuildRecord> {
        self.records()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound { id: id.0.clone() })
    }

    async fn save(&self, record: &RepoBuildRecord) -> StorageResult<()> {
        let mut records = self.records();
        let slot = records
            .get_mut(record.id.as_str())
            .ok_or_else(|| StorageError::NotFound {
                id: record.id.0.clone(),
            })?;
        *slot = record.clone();
        self.saves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.status);
        Ok(())
    }

    async fn list_for_org(&self, org_id: &str) -> StorageResult<Vec<RepoBuildRecord>> {
        let mut found: Vec<RepoBuildRecord> = self
            .records()
            .values()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
