use serde::{Deserialize, Serialize};
use std::fmt;

/// Stored login material. Read-only to the executor.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    /// Long-lived password
    Static {
        username: String,
        password: String,
        #[serde(default)]
        enable_secret: Option<String>,
    },
    /// Password is the operator-supplied OTP of the device's (department, group) bucket
    OtpSeeded {
        username: String,
        #[serde(default)]
        enable_secret: Option<String>,
    },
}

impl Credential {
    #[inline]
    pub fn username(&self) -> &str {
        match self {
            Self::Static { username, .. } | Self::OtpSeeded { username, .. } => username,
        }
    }

    #[inline]
    pub fn is_otp(&self) -> bool {
        matches!(self, Self::OtpSeeded { .. })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { username, .. } => f
                .debug_struct("Static")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::OtpSeeded { username, .. } => f
                .debug_struct("OtpSeeded")
                .field("username", username)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: String,
    #[serde(flatten)]
    pub credential: Credential,
}
