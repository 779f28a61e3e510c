use crate::{
    session::TelnetSession,
    types::{PlatformProfile, TelnetConfig},
};
use async_trait::async_trait;
use netpilot_sdk::{
    LoginCredential, Session, SessionConnector, SessionError, SessionResult, SessionTarget,
};
use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpStream, time::timeout};
use tracing::{debug, instrument};

/// Opens Telnet CLI sessions over TCP.
#[derive(Debug, Clone, Default)]
pub struct TelnetConnector {
    config: TelnetConfig,
}

impl TelnetConnector {
    pub fn new(config: TelnetConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    /// Split `address` into host and port, falling back to the default port.
    ///
    /// Bracketed IPv6 literals carry their own port; bare IPv6 literals never do.
    pub fn host_port(&self, address: &str) -> (String, u16) {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return (addr.ip().to_string(), addr.port());
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (address.to_string(), self.config.default_port),
            },
            _ => (
                address.trim_matches(['[', ']']).to_string(),
                self.config.default_port,
            ),
        }
    }

    async fn open(&self, target: &SessionTarget) -> SessionResult<TcpStream> {
        let (host, port) = self.host_port(&target.address);
        let bound = Duration::from_millis(self.config.connection.connect_timeout_ms);
        let stream = match timeout(bound, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SessionError::Connection(format!(
                    "{host}:{port} unreachable: {e}"
                )))
            }
            Err(_) => return Err(SessionError::Timeout(bound)),
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl SessionConnector for TelnetConnector {
    fn name(&self) -> &str {
        "telnet"
    }

    #[instrument(
        name = "telnet-connect",
        skip_all,
        fields(address = %target.address, platform = %target.platform)
    )]
    async fn connect(
        &self,
        target: &SessionTarget,
        credential: &LoginCredential,
    ) -> SessionResult<Box<dyn Session>> {
        let stream = self.open(target).await?;
        let profile = PlatformProfile::for_platform(&target.platform);
        let mut session = TelnetSession::new(stream, profile, self.config);
        if let Err(e) = session.login(credential).await {
            session.close().await;
            return Err(e);
        }
        debug!(hostname = ?session.hostname(), "Telnet session established");
        Ok(Box::new(session))
    }
}
