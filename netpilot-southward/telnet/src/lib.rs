//! Telnet CLI driver.
//!
//! Speaks just enough of the Telnet protocol to drive a vendor CLI: option
//! negotiation is refused down to plain NVT, prompts are matched per platform
//! dialect and pager prompts are stepped over.

pub mod codec;
mod connector;
mod session;
pub mod types;

pub use connector::TelnetConnector;
pub use session::TelnetSession;
pub use types::{PlatformProfile, TelnetConfig, DEFAULT_TELNET_PORT};
