use super::device::{DeviceGroup, DeviceId};
use crate::constants::OTP_CACHE_PREFIX;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope of one OTP code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OtpBucket {
    pub department: String,
    pub device_group: DeviceGroup,
}

impl OtpBucket {
    pub fn new(department: impl Into<String>, device_group: DeviceGroup) -> Self {
        Self {
            department: department.into(),
            device_group,
        }
    }

    /// Cache key, e.g. `otp:netops:core`
    #[inline]
    pub fn cache_key(&self) -> String {
        format!(
            "{OTP_CACHE_PREFIX}:{}:{}",
            self.department,
            self.device_group.as_str()
        )
    }
}

impl fmt::Display for OtpBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.department, self.device_group)
    }
}

/// Cached OTP code. `Debug` never prints the code.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpEntry {
    code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OtpEntry {
    pub fn new(code: impl Into<String>, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            issued_at,
            expires_at,
        }
    }

    #[inline]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[inline]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.code.is_empty() && now < self.expires_at
    }
}

impl fmt::Debug for OtpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpEntry")
            .field("code", &"***")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Devices of one bucket that could not proceed because no valid OTP is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpPending {
    pub department: String,
    pub device_group: DeviceGroup,
    pub failed_devices: Vec<DeviceId>,
}

impl OtpPending {
    #[inline]
    pub fn bucket(&self) -> OtpBucket {
        OtpBucket::new(self.department.as_str(), self.device_group)
    }
}

/// Batch-level interruption: the operator must supply a code for every
/// pending bucket, then resubmit exactly `failed_devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRequiredSignal {
    pub task_id: String,
    pub pending: Vec<OtpPending>,
}

impl OtpRequiredSignal {
    /// All blocked devices across buckets, in bucket order.
    pub fn failed_devices(&self) -> Vec<DeviceId> {
        self.pending
            .iter()
            .flat_map(|p| p.failed_devices.iter().cloned())
            .collect()
    }
}
