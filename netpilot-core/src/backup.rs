use chrono::Utc;
use dashmap::DashMap;
use netpilot_error::{storage::StorageError, NPResult, StorageResult};
use netpilot_models::{
    domain::prelude::{BackupDisposition, BackupRecord, BackupType, StoredBackup},
    settings::BackupConfig,
    BackupRepository,
};
use netpilot_utils::{diff::unified_diff, hash::fingerprint};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Result of [`BackupEngine::maybe_persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub persisted: bool,
    pub fingerprint: String,
    /// Set only when a new record was written
    pub record: Option<BackupRecord>,
}

impl PersistOutcome {
    pub fn disposition(&self) -> BackupDisposition {
        match &self.record {
            Some(record) => BackupDisposition::Persisted {
                record_id: record.id.clone(),
                fingerprint: self.fingerprint.clone(),
            },
            None => BackupDisposition::DedupSkipped {
                fingerprint: self.fingerprint.clone(),
            },
        }
    }
}

/// Content-addressed dedup in front of the backup repository.
pub struct BackupEngine {
    repo: Arc<dyn BackupRepository>,
    config: BackupConfig,
    /// Per-device lock so the read-compare-write runs once at a time per device.
    /// Entries are pruned once idle.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BackupEngine {
    pub fn new(repo: Arc<dyn BackupRepository>, config: BackupConfig) -> Self {
        Self {
            repo,
            config,
            locks: DashMap::new(),
        }
    }

    #[inline]
    pub fn repository(&self) -> &Arc<dyn BackupRepository> {
        &self.repo
    }

    /// Canonical form used for fingerprinting. The stored blob keeps the raw text.
    pub fn normalize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for line in text.split('\n') {
            let line = if self.config.normalize_line_endings {
                line.trim_end()
            } else {
                line
            };
            if self
                .config
                .ignore_line_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && line.trim_start().starts_with(prefix.as_str()))
            {
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        if self.config.normalize_line_endings {
            let trimmed = out.trim_end_matches('\n').len();
            out.truncate(trimmed);
        }
        out
    }

    #[inline]
    pub fn fingerprint(&self, text: &str) -> String {
        fingerprint(&self.normalize(text))
    }

    /// Persist `text` as a new backup unless it matches the device's latest one.
    ///
    /// A match is a successful no-op, reported as `persisted == false`.
    pub async fn maybe_persist(
        &self,
        device_id: &str,
        text: &str,
        backup_type: BackupType,
    ) -> StorageResult<PersistOutcome> {
        let fingerprint = self.fingerprint(text);

        let lock = Arc::clone(self.locks.entry(device_id.to_string()).or_default().value());
        let outcome = {
            let _serialized = lock.lock().await;
            self.persist_serialized(device_id, text, backup_type, fingerprint).await
        };
        drop(lock);
        // Nobody else holds or waits on it once only the map refers to it
        self.locks.remove_if(device_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn persist_serialized(
        &self,
        device_id: &str,
        text: &str,
        backup_type: BackupType,
        fingerprint: String,
    ) -> StorageResult<PersistOutcome> {
        let latest = self.repo.latest_fingerprint(device_id).await?;
        if latest.as_deref() == Some(fingerprint.as_str()) {
            debug!(device_id, fingerprint = %fingerprint, "Configuration unchanged, skipping backup");
            return Ok(PersistOutcome {
                persisted: false,
                fingerprint,
                record: None,
            });
        }

        let record = BackupRecord {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            fingerprint: fingerprint.clone(),
            backup_type,
            blob_ref: format!("backup://{device_id}/{fingerprint}"),
            size_bytes: text.len(),
            created_at: Utc::now(),
        };
        self.repo.save_backup(record.clone(), text.to_string()).await?;
        info!(device_id, record_id = %record.id, backup_type = %backup_type, "Backup persisted");

        Ok(PersistOutcome {
            persisted: true,
            fingerprint,
            record: Some(record),
        })
    }

    async fn load(&self, id: &str) -> NPResult<StoredBackup> {
        Ok(self
            .repo
            .get_backup(id)
            .await?
            .ok_or_else(|| StorageError::not_found("backup", id))?)
    }

    /// Unified diff from backup `old_id` to backup `new_id`.
    pub async fn diff(&self, old_id: &str, new_id: &str) -> NPResult<String> {
        let old = self.load(old_id).await?;
        let new = self.load(new_id).await?;
        Ok(Self::diff_stored(&old, &new, self.config.diff_context))
    }

    /// Pure over the two stored blobs; labels come from the records themselves.
    pub fn diff_stored(old: &StoredBackup, new: &StoredBackup, context: usize) -> String {
        unified_diff(
            &old.content,
            &new.content,
            &label(&old.record),
            &label(&new.record),
            context,
        )
    }
}

fn label(record: &BackupRecord) -> String {
    format!(
        "{}@{} ({})",
        record.device_id,
        record.id,
        record.created_at.to_rfc3339()
    )
}
