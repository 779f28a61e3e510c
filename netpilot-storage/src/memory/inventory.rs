use async_trait::async_trait;
use dashmap::DashMap;
use netpilot_error::StorageResult;
use netpilot_models::{
    domain::prelude::{CredentialRecord, Device},
    CredentialStore, DeviceInventory,
};

/// In-memory device inventory.
#[derive(Default)]
pub struct MemoryInventory {
    devices: DashMap<String, Device>,
}

impl MemoryInventory {
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        let inventory = Self::default();
        for device in devices {
            inventory.upsert(device);
        }
        inventory
    }

    pub fn upsert(&self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceInventory for MemoryInventory {
    async fn get_device(&self, id: &str) -> StorageResult<Option<Device>> {
        Ok(self.devices.get(id).map(|d| d.value().clone()))
    }
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: DashMap<String, CredentialRecord>,
}

impl MemoryCredentialStore {
    pub fn new(records: impl IntoIterator<Item = CredentialRecord>) -> Self {
        let store = Self::default();
        for record in records {
            store.upsert(record);
        }
        store
    }

    pub fn upsert(&self, record: CredentialRecord) {
        self.records.insert(record.id.clone(), record);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_credential(&self, reference: &str) -> StorageResult<Option<CredentialRecord>> {
        Ok(self.records.get(reference).map(|r| r.value().clone()))
    }
}
