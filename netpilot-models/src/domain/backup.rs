use super::device::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    #[default]
    Manual,
    Scheduled,
    PreChange,
    PostChange,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::PreChange => "pre_change",
            Self::PostChange => "post_change",
        };
        f.write_str(s)
    }
}

/// Content-addressed configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub device_id: DeviceId,
    /// SHA-256 hex of the normalized configuration text
    pub fingerprint: String,
    pub backup_type: BackupType,
    /// Reference to the stored blob, owned by the persistence collaborator
    pub blob_ref: String,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

/// Record together with its configuration text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBackup {
    pub record: BackupRecord,
    pub content: String,
}

/// What the dedup engine did with one collected configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum BackupDisposition {
    Persisted { record_id: String, fingerprint: String },
    DedupSkipped { fingerprint: String },
}

impl BackupDisposition {
    #[inline]
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }

    #[inline]
    pub fn fingerprint(&self) -> &str {
        match self {
            Self::Persisted { fingerprint, .. } | Self::DedupSkipped { fingerprint } => fingerprint,
        }
    }
}
