use async_trait::async_trait;
use dashmap::DashMap;
use netpilot_error::{storage::StorageError, StorageResult};
use netpilot_models::{
    domain::prelude::{BackupRecord, StoredBackup},
    BackupRepository,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// In-memory backup repository.
///
/// Records are kept per device in insertion order and looked up by record id.
/// Save failures can be injected for tests of the error path.
#[derive(Default)]
pub struct MemoryBackupStore {
    records: DashMap<String, StoredBackup>,
    by_device: DashMap<String, Vec<String>>,
    fail_next_saves: AtomicUsize,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail with `StorageError::WriteFailed`.
    pub fn fail_next_saves(&self, n: usize) {
        self.fail_next_saves.store(n, Ordering::SeqCst);
    }

    /// Number of records stored for `device_id`.
    pub fn count_for(&self, device_id: &str) -> usize {
        self.by_device.get(device_id).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Total number of records stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl BackupRepository for MemoryBackupStore {
    async fn latest_fingerprint(&self, device_id: &str) -> StorageResult<Option<String>> {
        let Some(ids) = self.by_device.get(device_id) else {
            return Ok(None);
        };
        Ok(ids
            .last()
            .and_then(|id| self.records.get(id))
            .map(|s| s.record.fingerprint.clone()))
    }

    async fn save_backup(&self, record: BackupRecord, content: String) -> StorageResult<()> {
        let injected = self
            .fail_next_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            warn!(record_id = %record.id, "Injected backup save failure");
            return Err(StorageError::WriteFailed(format!(
                "injected failure for backup {}",
                record.id
            )));
        }

        let id = record.id.clone();
        let device_id = record.device_id.clone();
        self.records
            .insert(id.clone(), StoredBackup { record, content });
        debug!(device_id = %device_id, record_id = %id, "Backup stored in memory");
        self.by_device.entry(device_id).or_default().push(id);
        Ok(())
    }

    async fn get_backup(&self, id: &str) -> StorageResult<Option<StoredBackup>> {
        Ok(self.records.get(id).map(|s| s.value().clone()))
    }

    async fn list_backups(
        &self,
        device_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<BackupRecord>> {
        let Some(ids) = self.by_device.get(device_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.records.get(id).map(|s| s.record.clone()))
            .collect())
    }
}
