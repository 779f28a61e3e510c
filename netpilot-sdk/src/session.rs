use crate::error::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub type SessionResult<T> = Result<T, SessionError>;

/// Pool key: at most one live session exists per `(address, platform)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub address: Arc<str>,
    pub platform: Arc<str>,
}

impl DeviceKey {
    pub fn new(address: impl Into<Arc<str>>, platform: impl Into<Arc<str>>) -> Self {
        Self {
            address: address.into(),
            platform: platform.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.platform, self.address)
    }
}

/// Where and how to reach a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    /// Host name or IP address, optionally with `:port`
    pub address: String,
    /// Vendor/platform identifier, e.g. `cisco_ios`, `huawei_vrp`
    pub platform: String,
}

impl SessionTarget {
    pub fn new(address: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            platform: platform.into(),
        }
    }

    #[inline]
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.address.as_str(), self.platform.as_str())
    }
}

/// Resolved login material handed to a connector.
///
/// `Debug` never prints the secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCredential {
    pub username: String,
    password: String,
    #[serde(default)]
    enable_secret: Option<String>,
}

impl LoginCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            enable_secret: None,
        }
    }

    pub fn with_enable_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_secret = Some(secret.into());
        self
    }

    #[inline]
    pub fn password(&self) -> &str {
        &self.password
    }

    #[inline]
    pub fn enable_secret(&self) -> Option<&str> {
        self.enable_secret.as_deref()
    }
}

impl fmt::Debug for LoginCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredential")
            .field("username", &self.username)
            .field("password", &"***")
            .field(
                "enable_secret",
                &self.enable_secret.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

/// An authenticated, interactive device session.
///
/// Sessions are driven by one task at a time; the connection pool guarantees
/// exclusive access per [`DeviceKey`].
#[async_trait]
pub trait Session: Send + 'static {
    /// Whether the underlying transport can still carry commands.
    fn is_usable(&self) -> bool;

    /// Run one exec-mode command and return its output without echo/prompt.
    async fn execute(&mut self, command: &str) -> SessionResult<String>;

    /// Enter configuration mode, apply `commands` in order, leave configuration mode.
    ///
    /// Returns the combined device echo. The first rejected command aborts the
    /// remaining ones with [`SessionError::Command`].
    async fn send_config(&mut self, commands: &[String]) -> SessionResult<String>;

    /// Gracefully terminate the session. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Opens new sessions. This is the only place connection-setup network I/O happens.
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    /// Connector name for logs
    fn name(&self) -> &str;

    /// Open and authenticate a new session to `target`.
    async fn connect(
        &self,
        target: &SessionTarget,
        credential: &LoginCredential,
    ) -> SessionResult<Box<dyn Session>>;
}

#[async_trait]
impl<T: SessionConnector + ?Sized> SessionConnector for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn connect(
        &self,
        target: &SessionTarget,
        credential: &LoginCredential,
    ) -> SessionResult<Box<dyn Session>> {
        (**self).connect(target, credential).await
    }
}

/// Timeouts applied by drivers and the pool when talking to devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    #[serde(default = "ConnectionPolicy::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "ConnectionPolicy::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "ConnectionPolicy::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl ConnectionPolicy {
    fn default_connect_timeout_ms() -> u64 {
        10000
    }
    fn default_read_timeout_ms() -> u64 {
        10000
    }
    fn default_write_timeout_ms() -> u64 {
        10000
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            connect_timeout_ms: ConnectionPolicy::default_connect_timeout_ms(),
            read_timeout_ms: ConnectionPolicy::default_read_timeout_ms(),
            write_timeout_ms: ConnectionPolicy::default_write_timeout_ms(),
        }
    }
}
