pub mod cache;
pub mod constants;
pub mod domain;
pub mod settings;

use crate::domain::prelude::{
    BackupRecord, CommandIntent, CredentialRecord, Device, StoredBackup,
};
use async_trait::async_trait;
use netpilot_error::StorageResult;

/// Read-only device inventory owned by the surrounding platform.
#[async_trait]
pub trait DeviceInventory: Send + Sync + 'static {
    /// Look up one device by id.
    async fn get_device(&self, id: &str) -> StorageResult<Option<Device>>;
}

/// Read-only credential store. Creation and rotation happen elsewhere.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn get_credential(&self, reference: &str) -> StorageResult<Option<CredentialRecord>>;
}

/// Platform/intent to ordered command list.
///
/// A pure lookup: the executor never embeds vendor command strings itself.
pub trait CommandCatalog: Send + Sync + 'static {
    /// `None` when the platform or intent is unknown.
    fn commands_for(&self, platform: &str, intent: CommandIntent) -> Option<Vec<String>>;
}

/// Persistence of configuration snapshots.
#[async_trait]
pub trait BackupRepository: Send + Sync + 'static {
    /// Fingerprint of the device's most recent backup.
    async fn latest_fingerprint(&self, device_id: &str) -> StorageResult<Option<String>>;

    /// Persist a record and its configuration text.
    async fn save_backup(&self, record: BackupRecord, content: String) -> StorageResult<()>;

    /// Load a stored backup by record id.
    async fn get_backup(&self, id: &str) -> StorageResult<Option<StoredBackup>>;

    /// Records of a device, newest first, at most `limit`.
    async fn list_backups(&self, device_id: &str, limit: usize)
        -> StorageResult<Vec<BackupRecord>>;
}

/// Turns raw device output into structured facts.
///
/// Template matching is owned by an external collaborator; the executor only
/// forwards the text and stores whatever comes back.
pub trait OutputParser: Send + Sync + 'static {
    fn parse(
        &self,
        platform: &str,
        intent: CommandIntent,
        output: &str,
    ) -> Option<serde_json::Value>;
}
