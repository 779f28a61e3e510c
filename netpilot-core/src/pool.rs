//! Process-wide connection pool.
//!
//! At most one live session exists per [`DeviceKey`]. A semaphore caps the
//! number of live sessions (idle and leased) at `max_connections`; every live
//! session owns one permit for its whole lifetime, so the cap holds no matter
//! how many batches share the pool.

use dashmap::DashMap;
use netpilot_error::NPError;
use netpilot_models::settings::PoolConfig;
use netpilot_sdk::{
    ConnectionPolicy, DeviceKey, LoginCredential, Session, SessionConnector, SessionError,
    SessionResult, SessionTarget,
};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore, TryAcquireError},
    task::JoinHandle,
    time::{interval, sleep_until, timeout, timeout_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    /// Every slot stayed busy for the whole acquire timeout
    #[error("no session slot available within {0:?}")]
    Exhausted(Duration),
    #[error("connection pool is closed")]
    Closed,
    /// The connector failed to open the session
    #[error(transparent)]
    Connect(#[from] SessionError),
}

impl From<PoolError> for NPError {
    #[inline]
    fn from(e: PoolError) -> Self {
        NPError::PoolError(e.to_string())
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_connections: usize,
    /// Sessions holding a slot: idle, leased or being opened
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub peak_live: usize,
    pub opened: u64,
    pub reused: u64,
    pub discarded: u64,
}

struct PooledEntry {
    session: Box<dyn Session>,
    created_at: Instant,
    last_used: Instant,
    _permit: OwnedSemaphorePermit,
}

impl PooledEntry {
    #[inline]
    fn is_stale(&self, now: Instant, config: &PoolConfig) -> bool {
        now.saturating_duration_since(self.created_at) > config.max_age()
            || now.saturating_duration_since(self.last_used) > config.max_idle()
            || !self.session.is_usable()
    }
}

type Slot = Option<PooledEntry>;

#[derive(Default)]
struct Counters {
    idle: AtomicUsize,
    in_use: AtomicUsize,
    peak_live: AtomicUsize,
    opened: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

struct PoolInner {
    config: PoolConfig,
    connection: ConnectionPolicy,
    connector: Arc<dyn SessionConnector>,
    /// One mutex per key; holding it is what makes access per-key exclusive
    slots: DashMap<DeviceKey, Arc<Mutex<Slot>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    /// Signalled whenever a session goes back to idle
    released: Notify,
    closed: AtomicBool,
    counters: Counters,
}

/// Shared handle to the pool. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        config: PoolConfig,
        connection: ConnectionPolicy,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        let capacity = config.max_connections.max(1);
        Self {
            inner: Arc::new(PoolInner {
                config,
                connection,
                connector,
                slots: DashMap::new(),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                released: Notify::new(),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    #[inline]
    pub fn max_connections(&self) -> usize {
        self.inner.capacity
    }

    /// Lease the session for `target`, opening one if needed.
    ///
    /// A pooled entry older than `max_age` or idle longer than `max_idle` is
    /// closed and replaced. When the pool is full, the least recently used idle
    /// session of another key is evicted; with nothing idle the call waits up to
    /// `acquire_timeout`. Connector failures are returned as is, never retried.
    #[instrument(name = "pool-acquire", skip_all, fields(key = %target.key()))]
    pub async fn acquire(
        &self,
        target: &SessionTarget,
        credential: &LoginCredential,
    ) -> Result<PooledSession, PoolError> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let key = target.key();
        let acquire_timeout = inner.config.acquire_timeout();
        let deadline = Instant::now() + acquire_timeout;

        let slot = inner.slot(&key);
        let mut guard = timeout_at(deadline, slot.lock_owned())
            .await
            .map_err(|_| PoolError::Exhausted(acquire_timeout))?;

        if let Some(entry) = guard.take() {
            inner.counters.idle.fetch_sub(1, Ordering::AcqRel);
            if entry.is_stale(Instant::now(), &inner.config) {
                debug!("Discarding stale pooled session");
                inner.close_entry(entry).await;
            } else {
                inner.counters.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(self.lease(key, guard, entry));
            }
        }

        let permit = inner.reserve(&key, deadline, acquire_timeout).await?;

        let connect_timeout = Duration::from_millis(inner.connection.connect_timeout_ms);
        let session = match timeout(connect_timeout, inner.connector.connect(target, credential))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                debug!(error = %e, "Session open failed");
                return Err(PoolError::Connect(e));
            }
            Err(_) => return Err(PoolError::Connect(SessionError::Timeout(connect_timeout))),
        };

        inner.counters.opened.fetch_add(1, Ordering::Relaxed);
        inner
            .counters
            .peak_live
            .fetch_max(inner.live(), Ordering::AcqRel);

        let now = Instant::now();
        let entry = PooledEntry {
            session,
            created_at: now,
            last_used: now,
            _permit: permit,
        };
        Ok(self.lease(key, guard, entry))
    }

    fn lease(
        &self,
        key: DeviceKey,
        guard: OwnedMutexGuard<Slot>,
        entry: PooledEntry,
    ) -> PooledSession {
        self.inner.counters.in_use.fetch_add(1, Ordering::AcqRel);
        PooledSession {
            key,
            entry: Some(entry),
            guard: Some(guard),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Close every idle session that is stale. Returns how many were closed.
    pub async fn reap(&self) -> usize {
        self.inner.reap().await
    }

    /// Run [`reap`](Self::reap) every `reap_interval_secs` until `token` is cancelled.
    pub fn spawn_reaper(&self, token: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        let period = Duration::from_secs(self.inner.config.reap_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = pool.reap().await;
                        if reaped > 0 {
                            debug!(reaped, "Reaped stale sessions");
                        }
                    }
                    _ = token.cancelled() => {
                        info!("Connection pool reaper stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Refuse new acquisitions and close idle sessions.
    ///
    /// Leased sessions are closed when their lease ends.
    pub async fn close_all(&self) -> usize {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.permits.close();

        let mut closed = 0;
        for slot in inner.snapshot_slots(None) {
            let Ok(mut guard) = slot.try_lock_owned() else {
                continue;
            };
            if let Some(entry) = guard.take() {
                inner.counters.idle.fetch_sub(1, Ordering::AcqRel);
                inner.close_entry(entry).await;
                closed += 1;
            }
        }
        inner.released.notify_waiters();
        info!(closed, "Connection pool closed");
        closed
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let c = &inner.counters;
        PoolStats {
            max_connections: inner.capacity,
            live: inner.live(),
            idle: c.idle.load(Ordering::Acquire),
            in_use: c.in_use.load(Ordering::Acquire),
            peak_live: c.peak_live.load(Ordering::Acquire),
            opened: c.opened.load(Ordering::Relaxed),
            reused: c.reused.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
        }
    }
}

impl PoolInner {
    #[inline]
    fn ensure_open(&self) -> Result<(), PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PoolError::Closed)
        } else {
            Ok(())
        }
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[inline]
    fn live(&self) -> usize {
        self.capacity
            .saturating_sub(self.permits.available_permits())
    }

    fn slot(&self, key: &DeviceKey) -> Arc<Mutex<Slot>> {
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    fn snapshot_slots(&self, except: Option<&DeviceKey>) -> Vec<Arc<Mutex<Slot>>> {
        self.slots
            .iter()
            .filter(|e| Some(e.key()) != except)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    async fn close_entry(&self, mut entry: PooledEntry) {
        entry.session.close().await;
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Take one live-session permit, evicting idle sessions of other keys when full.
    async fn reserve(
        &self,
        key: &DeviceKey,
        deadline: Instant,
        acquire_timeout: Duration,
    ) -> Result<OwnedSemaphorePermit, PoolError> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
                Err(TryAcquireError::NoPermits) => {}
            }

            if self.evict_lru_idle(key).await {
                continue;
            }

            tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    return permit.map_err(|_| PoolError::Closed);
                }
                _ = released.as_mut() => continue,
                _ = sleep_until(deadline) => {
                    warn!(key = %key, "Connection pool exhausted");
                    return Err(PoolError::Exhausted(acquire_timeout));
                }
            }
        }
    }

    /// Close the least recently used idle session of any key but `except`.
    async fn evict_lru_idle(&self, except: &DeviceKey) -> bool {
        let mut oldest: Option<(Instant, OwnedMutexGuard<Slot>)> = None;
        for slot in self.snapshot_slots(Some(except)) {
            let Ok(guard) = slot.try_lock_owned() else {
                continue;
            };
            let Some(last_used) = guard.as_ref().map(|e| e.last_used) else {
                continue;
            };
            match &oldest {
                Some((seen, _)) if *seen <= last_used => {}
                _ => oldest = Some((last_used, guard)),
            }
        }

        let Some((_, mut guard)) = oldest else {
            return false;
        };
        let Some(entry) = guard.take() else {
            return false;
        };
        self.counters.idle.fetch_sub(1, Ordering::AcqRel);
        debug!("Evicting least recently used idle session");
        self.close_entry(entry).await;
        true
    }

    async fn reap(&self) -> usize {
        let now = Instant::now();
        let mut reaped = 0;
        for slot in self.snapshot_slots(None) {
            let Ok(mut guard) = slot.try_lock_owned() else {
                continue;
            };
            if !guard
                .as_ref()
                .is_some_and(|entry| entry.is_stale(now, &self.config))
            {
                continue;
            }
            if let Some(entry) = guard.take() {
                self.counters.idle.fetch_sub(1, Ordering::AcqRel);
                self.close_entry(entry).await;
                reaped += 1;
            }
        }

        // Drop empty slots nobody is waiting on
        self.slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1 || slot.try_lock().map(|g| g.is_some()).unwrap_or(true)
        });
        reaped
    }
}

/// Exclusive lease on one pooled session.
///
/// End it with [`release`](Self::release) to keep the session for reuse or
/// [`discard`](Self::discard) to close it. A lease dropped without either is
/// discarded without a graceful close.
pub struct PooledSession {
    key: DeviceKey,
    entry: Option<PooledEntry>,
    guard: Option<OwnedMutexGuard<Slot>>,
    pool: Arc<PoolInner>,
}

impl PooledSession {
    #[inline]
    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    #[inline]
    pub fn is_usable(&self) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|entry| entry.session.is_usable())
    }

    #[inline]
    fn session(&mut self) -> SessionResult<&mut Box<dyn Session>> {
        self.entry
            .as_mut()
            .map(|entry| &mut entry.session)
            .ok_or(SessionError::Closed)
    }

    pub async fn execute(&mut self, command: &str) -> SessionResult<String> {
        self.session()?.execute(command).await
    }

    pub async fn send_config(&mut self, commands: &[String]) -> SessionResult<String> {
        self.session()?.send_config(commands).await
    }

    /// Return the session to the pool, or close it if it is no longer usable.
    pub async fn release(mut self) {
        let (Some(mut entry), Some(mut guard)) = (self.entry.take(), self.guard.take()) else {
            return;
        };
        self.pool.counters.in_use.fetch_sub(1, Ordering::AcqRel);

        if self.pool.is_closed() || !entry.session.is_usable() {
            self.pool.close_entry(entry).await;
            return;
        }

        entry.last_used = Instant::now();
        *guard = Some(entry);
        self.pool.counters.idle.fetch_add(1, Ordering::AcqRel);
        drop(guard);
        self.pool.released.notify_waiters();
    }

    /// Close the session and free its slot.
    pub async fn discard(mut self) {
        let guard = self.guard.take();
        if let Some(entry) = self.entry.take() {
            self.pool.counters.in_use.fetch_sub(1, Ordering::AcqRel);
            self.pool.close_entry(entry).await;
        }
        // Per-key lock is held until the old session is closed
        drop(guard);
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            warn!(key = %self.key, "Session lease dropped without release");
            self.pool.counters.in_use.fetch_sub(1, Ordering::AcqRel);
            self.pool.counters.discarded.fetch_add(1, Ordering::Relaxed);
            drop(entry);
        }
    }
}
