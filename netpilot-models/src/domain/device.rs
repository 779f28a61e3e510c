use netpilot_sdk::SessionTarget;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DeviceId = String;

/// Network tier a device belongs to. OTP gating is configured per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceGroup {
    Core,
    Distribution,
    Access,
}

impl DeviceGroup {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Distribution => "distribution",
            Self::Access => "access",
        }
    }
}

impl fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inventory view of a managed device. Immutable for the duration of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub name: String,
    /// Management address, optionally `host:port`
    pub address: String,
    /// Vendor/platform identifier used for command lookup and driver profile
    pub platform: String,
    /// Owning department; scopes OTP codes together with `group`
    #[serde(default)]
    pub department: String,
    pub group: DeviceGroup,
    /// Reference into the credential store
    pub credential_ref: String,
}

impl Device {
    #[inline]
    pub fn target(&self) -> SessionTarget {
        SessionTarget::new(self.address.as_str(), self.platform.as_str())
    }

    /// Name for logs, falls back to the id.
    #[inline]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
