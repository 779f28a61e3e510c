use chrono::Utc;
use netpilot_error::{NPError, NPResult};
use netpilot_models::{
    cache::NPBaseCache,
    domain::prelude::{
        Credential, Device, DeviceGroup, DeviceOutcome, DeviceResult, OtpBucket, OtpEntry,
        OtpPending,
    },
    settings::{OtpConfig, OtpPolicy},
    CredentialStore,
};
use netpilot_sdk::LoginCredential;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};

pub type OtpCache = Arc<dyn NPBaseCache<Value = OtpEntry>>;

/// How one device will authenticate in this submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(LoginCredential),
    NeedsOtp(OtpBucket),
}

/// Outcome of evaluating every device of a submission once.
#[derive(Debug, Default)]
pub struct BatchResolution {
    /// Devices that can be dispatched now
    pub resolved: Vec<(Device, LoginCredential)>,
    /// Devices blocked on a missing or expired OTP, grouped by bucket
    pub pending: Vec<OtpPending>,
    /// Devices whose credential could not be loaded; already terminal
    pub failed: Vec<DeviceResult>,
}

impl BatchResolution {
    #[inline]
    pub fn needs_otp(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Resolves login material, consulting the OTP cache for gated device groups.
pub struct CredentialGate {
    store: Arc<dyn CredentialStore>,
    cache: OtpCache,
    config: OtpConfig,
}

impl CredentialGate {
    pub fn new(store: Arc<dyn CredentialStore>, cache: OtpCache, config: OtpConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    #[inline]
    pub fn policy(&self) -> OtpPolicy {
        self.config.policy
    }

    #[inline]
    fn is_gated(&self, device: &Device, credential: &Credential) -> bool {
        credential.is_otp() || self.config.otp_groups.contains(&device.group)
    }

    /// Resolve a single device against the current cache state.
    pub async fn resolve(&self, device: &Device) -> NPResult<Resolution> {
        let mut memo = HashMap::new();
        self.resolve_with(device, &mut memo).await
    }

    /// `memo` pins each bucket's cache view for the duration of one submission.
    async fn resolve_with(
        &self,
        device: &Device,
        memo: &mut HashMap<OtpBucket, Option<OtpEntry>>,
    ) -> NPResult<Resolution> {
        let record = self
            .store
            .get_credential(&device.credential_ref)
            .await?
            .ok_or_else(|| NPError::CredentialNotFound(device.credential_ref.clone()))?;
        let gated = self.is_gated(device, &record.credential);

        let (username, password, enable_secret) = match record.credential {
            Credential::Static {
                username,
                password,
                enable_secret,
            } => (username, Some(password), enable_secret),
            Credential::OtpSeeded {
                username,
                enable_secret,
            } => (username, None, enable_secret),
        };

        let password = match (gated, password) {
            (false, Some(password)) => password,
            _ => {
                let bucket = OtpBucket::new(device.department.as_str(), device.group);
                match self.cached_code(&bucket, memo).await? {
                    Some(entry) => entry.code().to_string(),
                    None => return Ok(Resolution::NeedsOtp(bucket)),
                }
            }
        };

        let credential = LoginCredential::new(username, password);
        Ok(Resolution::Resolved(match enable_secret {
            Some(secret) => credential.with_enable_secret(secret),
            None => credential,
        }))
    }

    async fn cached_code(
        &self,
        bucket: &OtpBucket,
        memo: &mut HashMap<OtpBucket, Option<OtpEntry>>,
    ) -> NPResult<Option<OtpEntry>> {
        if let Some(entry) = memo.get(bucket) {
            return Ok(entry.clone());
        }
        let now = Utc::now();
        let entry = self
            .cache
            .get(&bucket.cache_key())
            .await?
            .filter(|entry| entry.is_valid_at(now));
        memo.insert(bucket.clone(), entry.clone());
        Ok(entry)
    }

    /// Evaluate every device of a submission exactly once.
    ///
    /// Devices of buckets with a valid cached OTP are resolved even when other
    /// buckets of the same batch are blocked. Under `single_use` every bucket
    /// that resolved at least one device is consumed afterwards.
    #[instrument(name = "gate-resolve-batch", skip_all, fields(devices = devices.len()))]
    pub async fn resolve_batch(&self, devices: Vec<Device>) -> BatchResolution {
        let mut memo = HashMap::new();
        let mut used: BTreeSet<OtpBucket> = BTreeSet::new();
        let mut blocked: BTreeMap<OtpBucket, Vec<String>> = BTreeMap::new();
        let mut outcome = BatchResolution::default();

        for device in devices {
            match self.resolve_with(&device, &mut memo).await {
                Ok(Resolution::Resolved(credential)) => {
                    let bucket = OtpBucket::new(device.department.as_str(), device.group);
                    if memo.get(&bucket).is_some_and(|entry| entry.is_some()) {
                        used.insert(bucket);
                    }
                    outcome.resolved.push((device, credential));
                }
                Ok(Resolution::NeedsOtp(bucket)) => {
                    blocked.entry(bucket).or_default().push(device.id);
                }
                Err(e) => {
                    warn!(device_id = %device.id, error = %e, "Credential resolution failed");
                    outcome.failed.push(DeviceResult::failed(
                        device.id,
                        DeviceOutcome::AuthError,
                        e.to_string(),
                    ));
                }
            }
        }

        outcome.pending = blocked
            .into_iter()
            .map(|(bucket, failed_devices)| OtpPending {
                department: bucket.department,
                device_group: bucket.device_group,
                failed_devices,
            })
            .collect();

        if self.config.policy == OtpPolicy::SingleUse {
            for bucket in used {
                if let Err(e) = self.cache.remove(&bucket.cache_key()).await {
                    warn!(bucket = %bucket, error = %e, "Failed to consume single-use OTP");
                }
            }
        }

        if outcome.needs_otp() {
            debug!(
                buckets = outcome.pending.len(),
                "Submission has devices awaiting OTP"
            );
        }
        outcome
    }

    /// Cache an operator-supplied code for `(department, group)`. Last writer wins.
    pub async fn supply_otp(
        &self,
        department: &str,
        group: DeviceGroup,
        code: &str,
    ) -> NPResult<OtpEntry> {
        let code = code.trim();
        if code.is_empty() {
            return Err(NPError::InvalidResume("OTP code must not be empty".into()));
        }
        let ttl = self.config.ttl();
        let chrono_ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| NPError::ConfigurationError(format!("invalid otp ttl: {e}")))?;

        let bucket = OtpBucket::new(department, group);
        let issued_at = Utc::now();
        let entry = OtpEntry::new(code, issued_at, issued_at + chrono_ttl);
        self.cache
            .put_until(&bucket.cache_key(), entry.clone(), entry.expires_at)
            .await?;
        info!(bucket = %bucket, expires_at = %entry.expires_at, "OTP cached");
        Ok(entry)
    }

    /// Drop the cached code of a bucket.
    pub async fn invalidate(&self, bucket: &OtpBucket) -> NPResult<bool> {
        Ok(self.cache.remove(&bucket.cache_key()).await?)
    }
}
