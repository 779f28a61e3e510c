pub mod cache;
pub mod catalog;
pub mod memory;

use cache::MokaCache;
use netpilot_models::{
    constants::OTP_CACHE_NAME,
    domain::prelude::OtpEntry,
    settings::OtpConfig,
};

pub use catalog::StaticCommandCatalog;
pub use memory::{MemoryBackupStore, MemoryCredentialStore, MemoryInventory};

/// Process-local OTP cache sized and aged from settings.
///
/// Keys come from `OtpBucket::cache_key` and already carry their namespace.
pub fn new_otp_cache(config: &OtpConfig) -> MokaCache<OtpEntry> {
    MokaCache::new(
        OTP_CACHE_NAME,
        Some(config.cache_capacity),
        Some(config.ttl()),
    )
}
