mod backup;
mod inventory;

pub use backup::MemoryBackupStore;
pub use inventory::{MemoryCredentialStore, MemoryInventory};
