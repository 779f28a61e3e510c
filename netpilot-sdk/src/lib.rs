mod error;
mod retry;
mod session;

pub use error::SessionError;
pub use retry::RetryPolicy;
pub use session::{
    ConnectionPolicy, DeviceKey, LoginCredential, Session, SessionConnector, SessionResult,
    SessionTarget,
};

/// Internal re-exports for driver crates to avoid version drift
pub mod export {
    pub use async_trait;
    pub use tracing;
}
