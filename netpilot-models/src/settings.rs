use crate::{
    constants::{ENV_PREFIX, LOG_DIR, LOG_FILE_NAME},
    domain::prelude::{BackupType, CredentialRecord, Device, DeviceGroup, DeviceId},
};
use config::{Config, File};
use netpilot_error::NPResult;
use netpilot_sdk::{ConnectionPolicy, RetryPolicy};
use serde::{self, Deserialize};
use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self(Arc::new(Inner::default()))
    }
}

impl Settings {
    pub fn new(config_path: String) -> NPResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path.as_str()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("otp.otp_groups")
                    .with_list_parse_key("backup.ignore_line_prefixes"),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    pub fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub connection: ConnectionPolicy,
    #[serde(default)]
    pub otp: OtpConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// Runtime root directory; relative paths (logs) resolve from here.
    ///
    /// Environment override: `NP__GENERAL__RUNTIME_DIR=/var/lib/netpilot`
    #[serde(default = "General::runtime_dir_default")]
    pub runtime_dir: String,
}

impl Default for General {
    fn default() -> Self {
        General {
            runtime_dir: General::runtime_dir_default(),
        }
    }
}

impl General {
    fn runtime_dir_default() -> String {
        ".".into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    /// One of `trace`, `debug`, `info`, `warn`, `error`
    #[serde(default = "Log::level_default")]
    pub level: String,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
    #[serde(default = "Log::file_name_default")]
    pub file_name: String,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            level: Log::level_default(),
            dir: Log::dir_default(),
            file_name: Log::file_name_default(),
        }
    }
}

impl Log {
    fn level_default() -> String {
        "info".into()
    }

    fn dir_default() -> String {
        LOG_DIR.into()
    }

    fn file_name_default() -> String {
        LOG_FILE_NAME.into()
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PoolConfig {
    /// Process-wide cap of live sessions (idle + in use)
    #[serde(default = "PoolConfig::max_connections_default")]
    pub max_connections: usize,
    /// Idle sessions older than this are closed instead of reused
    #[serde(default = "PoolConfig::max_idle_secs_default")]
    pub max_idle_secs: u64,
    /// Sessions older than this are closed instead of reused
    #[serde(default = "PoolConfig::max_age_secs_default")]
    pub max_age_secs: u64,
    /// How long an acquire waits for a free slot before failing
    #[serde(default = "PoolConfig::acquire_timeout_ms_default")]
    pub acquire_timeout_ms: u64,
    /// Background eviction interval
    #[serde(default = "PoolConfig::reap_interval_secs_default")]
    pub reap_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: PoolConfig::max_connections_default(),
            max_idle_secs: PoolConfig::max_idle_secs_default(),
            max_age_secs: PoolConfig::max_age_secs_default(),
            acquire_timeout_ms: PoolConfig::acquire_timeout_ms_default(),
            reap_interval_secs: PoolConfig::reap_interval_secs_default(),
        }
    }
}

impl PoolConfig {
    fn max_connections_default() -> usize {
        50
    }

    fn max_idle_secs_default() -> u64 {
        300
    }

    fn max_age_secs_default() -> u64 {
        3600
    }

    fn acquire_timeout_ms_default() -> u64 {
        30000
    }

    fn reap_interval_secs_default() -> u64 {
        60
    }

    #[inline]
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    #[inline]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    #[inline]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum in-flight devices per batch, further capped by `pool.max_connections`
    #[serde(default = "ExecutorConfig::fan_out_default")]
    pub fan_out: usize,
    /// Overall bound for a collect (backup) exchange
    #[serde(default = "ExecutorConfig::collect_timeout_ms_default")]
    pub collect_timeout_ms: u64,
    /// Overall bound for a push (deploy) exchange
    #[serde(default = "ExecutorConfig::push_timeout_ms_default")]
    pub push_timeout_ms: u64,
    /// Overall bound for a probe (discovery) exchange
    #[serde(default = "ExecutorConfig::probe_timeout_ms_default")]
    pub probe_timeout_ms: u64,
    /// Retries for session establishment; other failures are never retried
    #[serde(default = "RetryPolicy::disabled")]
    pub connect_retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            fan_out: ExecutorConfig::fan_out_default(),
            collect_timeout_ms: ExecutorConfig::collect_timeout_ms_default(),
            push_timeout_ms: ExecutorConfig::push_timeout_ms_default(),
            probe_timeout_ms: ExecutorConfig::probe_timeout_ms_default(),
            connect_retry: RetryPolicy::disabled(),
        }
    }
}

impl ExecutorConfig {
    fn fan_out_default() -> usize {
        20
    }

    fn collect_timeout_ms_default() -> u64 {
        60000
    }

    fn push_timeout_ms_default() -> u64 {
        120000
    }

    fn probe_timeout_ms_default() -> u64 {
        30000
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPolicy {
    /// Code is reusable until it expires
    #[default]
    Ttl,
    /// Code is dropped after the first batch submission that resolved with it
    SingleUse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    #[serde(default = "OtpConfig::ttl_secs_default")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub policy: OtpPolicy,
    /// Groups whose devices always authenticate with the bucket OTP
    #[serde(default)]
    pub otp_groups: Vec<DeviceGroup>,
    #[serde(default = "OtpConfig::cache_capacity_default")]
    pub cache_capacity: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        OtpConfig {
            ttl_secs: OtpConfig::ttl_secs_default(),
            policy: OtpPolicy::default(),
            otp_groups: Vec::new(),
            cache_capacity: OtpConfig::cache_capacity_default(),
        }
    }
}

impl OtpConfig {
    fn ttl_secs_default() -> u64 {
        300
    }

    fn cache_capacity_default() -> u64 {
        1024
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Convert CRLF to LF and trim trailing whitespace before fingerprinting
    #[serde(default = "BackupConfig::normalize_line_endings_default")]
    pub normalize_line_endings: bool,
    /// Lines starting with any of these are excluded from the fingerprint
    #[serde(default)]
    pub ignore_line_prefixes: Vec<String>,
    /// Context lines around each hunk of a unified diff
    #[serde(default = "BackupConfig::diff_context_default")]
    pub diff_context: usize,
    #[serde(default)]
    pub schedules: Vec<BackupSchedule>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            normalize_line_endings: BackupConfig::normalize_line_endings_default(),
            ignore_line_prefixes: Vec::new(),
            diff_context: BackupConfig::diff_context_default(),
            schedules: Vec::new(),
        }
    }
}

impl BackupConfig {
    fn normalize_line_endings_default() -> bool {
        true
    }

    fn diff_context_default() -> usize {
        3
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupSchedule {
    pub name: String,
    pub interval_secs: u64,
    pub device_ids: Vec<DeviceId>,
    #[serde(default = "BackupSchedule::backup_type_default")]
    pub backup_type: BackupType,
}

impl BackupSchedule {
    fn backup_type_default() -> BackupType {
        BackupType::Scheduled
    }
}

/// Commands per intent for one platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformCommands {
    #[serde(default)]
    pub collect_config: Vec<String>,
    #[serde(default)]
    pub save_config: Vec<String>,
    #[serde(default)]
    pub discover: Vec<String>,
    #[serde(default)]
    pub probe: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub platforms: HashMap<String, PlatformCommands>,
}

/// Static inventory for the CLI's in-memory collaborators.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryConfig {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub credentials: Vec<CredentialRecord>,
}
