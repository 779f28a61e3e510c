//! Concurrent multi-device automation executor.
//!
//! [`AutomationService`] wires a bounded [`ConnectionPool`], the OTP-aware
//! [`CredentialGate`], the dedup [`BackupEngine`] and the
//! [`BatchOrchestrator`] behind one facade.

pub mod backup;
pub mod gate;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod task;

pub use backup::{BackupEngine, PersistOutcome};
pub use gate::{BatchResolution, CredentialGate, OtpCache, Resolution};
pub use orchestrator::{BatchOrchestrator, ExecutionReport};
pub use pool::{ConnectionPool, PoolError, PoolStats, PooledSession};
pub use progress::ProgressHub;
pub use runner::SessionRunner;
pub use scheduler::BackupScheduler;
pub use service::{AutomationService, Collaborators};
pub use task::{TaskHandle, TaskRegistry};
