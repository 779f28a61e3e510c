use std::time::Duration;
use thiserror::Error;

/// Errors raised by a protocol driver while opening or driving a device session.
///
/// Drivers map their transport-specific failures onto these variants so the
/// executor can classify device outcomes without knowing the protocol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// TCP connect refused, DNS failure, unreachable host and similar
    #[error("Connection error: {0}")]
    Connection(String),
    /// Credentials rejected by the device
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// No response within the configured bound
    #[error("Read/Write timeout after {0:?}")]
    Timeout(Duration),
    /// Device accepted the command but reported an error
    #[error("Command `{command}` rejected: {output}")]
    Command { command: String, output: String },
    /// Transport broke mid-exchange (reset, EOF)
    #[error("Transport error: {0}")]
    Transport(String),
    /// Peer sent something the driver could not interpret
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Session was already closed
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Whether the session that produced this error must be discarded
    /// instead of being returned to the pool.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Command { .. } | SessionError::Auth(_))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::AddrNotAvailable
            | ErrorKind::NotConnected => SessionError::Connection(err.to_string()),
            ErrorKind::TimedOut => SessionError::Timeout(Duration::ZERO),
            _ => SessionError::Transport(err.to_string()),
        }
    }
}
