use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netpilot_error::{storage::CacheError, StorageResult};
use std::time::Duration;

/// Shared key-value capability with per-entry expiry.
///
/// Process-wide state such as operator OTP codes goes through this seam, so a
/// plain map can stand in for tests and a distributed store for a cluster.
/// Entries past their lifetime are never returned.
#[async_trait]
pub trait NPBaseCache: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Logical name, for logs
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> StorageResult<Option<Self::Value>>;

    /// Store under the cache-wide default lifetime, if the backend has one.
    async fn put(&self, key: &str, value: Self::Value) -> StorageResult<()>;

    /// Store for `ttl`. A zero `ttl` is rejected.
    async fn put_for(&self, key: &str, value: Self::Value, ttl: Duration) -> StorageResult<()>;

    /// Store until `deadline`. A deadline that already passed is rejected.
    async fn put_until(
        &self,
        key: &str,
        value: Self::Value,
        deadline: DateTime<Utc>,
    ) -> StorageResult<()> {
        let ttl = (deadline - Utc::now())
            .to_std()
            .map_err(|_| CacheError::InvalidExpiry(format!("{deadline} is in the past")))?;
        self.put_for(key, value, ttl).await
    }

    /// Returns whether an entry was removed.
    async fn remove(&self, key: &str) -> StorageResult<bool>;

    async fn contains(&self, key: &str) -> StorageResult<bool>;
}
