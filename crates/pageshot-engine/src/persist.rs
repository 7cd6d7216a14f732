//! redb-backed implementations of the scheduler's persistence boundaries.
//!
//! The storage crate stays byte-level; these adapters own the serde_json
//! encoding of the engine's models.

use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use tracing::warn;

use pageshot_models::{CaptureRecord, ScheduleDefinition};
use pageshot_storage::Storage;

use crate::scheduler::{HistoryStore, ScheduleStore};

/// Schedule definitions persisted in the `schedules` table.
#[derive(Clone)]
pub struct RedbScheduleStore {
    storage: Arc<Storage>,
}

impl RedbScheduleStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn insert(&self, def: &ScheduleDefinition) -> AnyResult<()> {
        let bytes = serde_json::to_vec(def)?;
        self.storage.schedules.put_raw(&def.id, &bytes)
    }

    pub fn get(&self, id: &str) -> AnyResult<Option<ScheduleDefinition>> {
        match self.storage.schedules.get_raw(id)? {
            Some(bytes) => Ok(Some(decode(id, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> AnyResult<Vec<ScheduleDefinition>> {
        let mut schedules = Vec::new();
        for (id, bytes) in self.storage.schedules.list_raw()? {
            match decode(&id, &bytes) {
                Ok(def) => schedules.push(def),
                // One corrupt row should not hide the rest.
                Err(err) => warn!(schedule_id = %id, error = ?err, "skipping unreadable schedule"),
            }
        }
        Ok(schedules)
    }

    pub fn remove(&self, id: &str) -> AnyResult<bool> {
        self.storage.schedules.delete(id)
    }
}

fn decode(id: &str, bytes: &[u8]) -> AnyResult<ScheduleDefinition> {
    serde_json::from_slice(bytes).with_context(|| format!("failed to decode schedule '{id}'"))
}

#[async_trait]
impl ScheduleStore for RedbScheduleStore {
    async fn list_due(&self, now_ms: i64) -> AnyResult<Vec<ScheduleDefinition>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|def| def.is_due(now_ms))
            .collect())
    }

    async fn update(&self, def: &ScheduleDefinition) -> AnyResult<()> {
        self.insert(def)
    }
}

/// Retained captures persisted across the `capture_meta`/`capture_blobs`
/// tables.
#[derive(Clone)]
pub struct RedbHistoryStore {
    storage: Arc<Storage>,
}

impl RedbHistoryStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn list(&self) -> AnyResult<Vec<CaptureRecord>> {
        let mut records = Vec::new();
        for (id, bytes) in self.storage.history.list_meta_raw()? {
            match serde_json::from_slice(&bytes) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(record_id = %id, error = %err, "skipping unreadable capture record")
                }
            }
        }
        Ok(records)
    }

    pub fn image(&self, id: &str) -> AnyResult<Option<Vec<u8>>> {
        self.storage.history.get_blob(id)
    }

    /// Drop every retained capture belonging to a schedule, returning how
    /// many were removed.
    pub fn remove_for_schedule(&self, schedule_id: &str) -> AnyResult<usize> {
        let ids: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|record| record.schedule_id == schedule_id)
            .map(|record| record.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.storage.history.delete_many(&ids)
    }
}

#[async_trait]
impl HistoryStore for RedbHistoryStore {
    async fn store(&self, record: &CaptureRecord, bytes: &[u8]) -> AnyResult<()> {
        let meta = serde_json::to_vec(record)?;
        self.storage.history.put_raw(&record.id, &meta, bytes)
    }

    async fn purge_expired(&self, now_ms: i64) -> AnyResult<usize> {
        let expired: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|record| record.is_expired(now_ms))
            .map(|record| record.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        self.storage.history.delete_many(&expired)
    }
}
