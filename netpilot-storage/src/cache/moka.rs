use async_trait::async_trait;
use moka::{future::Cache, Expiry};
use netpilot_error::{storage::CacheError, StorageResult};
use netpilot_models::cache::NPBaseCache;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Timed<V> {
    value: V,
    /// Lifetime requested at write time; `None` falls back to the cache default
    ttl: Option<Duration>,
}

struct PerEntryTtl {
    default: Option<Duration>,
}

impl<K, V> Expiry<K, Timed<V>> for PerEntryTtl {
    fn expire_after_create(&self, _key: &K, item: &Timed<V>, _created: Instant) -> Option<Duration> {
        item.ttl.or(self.default)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        item: &Timed<V>,
        _updated: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        item.ttl.or(self.default)
    }
}

/// In-process [`NPBaseCache`] on top of moka, with a lifetime per entry.
pub struct MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    name: String,
    inner: Cache<String, Timed<V>>,
}

impl<V> MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// `default_ttl` applies to entries written with [`NPBaseCache::put`].
    pub fn new(
        name: impl Into<String>,
        max_capacity: Option<u64>,
        default_ttl: Option<Duration>,
    ) -> Self {
        let name = name.into();
        let mut builder = Cache::builder()
            .name(&name)
            .expire_after(PerEntryTtl {
                default: default_ttl,
            });
        if let Some(capacity) = max_capacity {
            builder = builder.max_capacity(capacity);
        }
        Self {
            name,
            inner: builder.build(),
        }
    }

    #[inline]
    async fn insert(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner.insert(key.to_string(), Timed { value, ttl }).await;
    }
}

#[async_trait]
impl<V> NPBaseCache for MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StorageResult<Option<V>> {
        Ok(self.inner.get(key).await.map(|item| item.value))
    }

    async fn put(&self, key: &str, value: V) -> StorageResult<()> {
        self.insert(key, value, None).await;
        Ok(())
    }

    async fn put_for(&self, key: &str, value: V, ttl: Duration) -> StorageResult<()> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidExpiry("ttl must be > 0".into()).into());
        }
        self.insert(key, value, Some(ttl)).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        Ok(self.inner.remove(key).await.is_some())
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.inner.contains_key(key))
    }
}
