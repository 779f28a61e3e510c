//! Error taxonomy shared by every NetPilot crate.
//!
//! Device-level failures never show up here: they are recorded as device
//! outcomes. `NPError` covers caller mistakes, collaborator outages and
//! process lifecycle problems.
pub mod storage;

use anyhow::Error as AnyhowError;
use config::ConfigError;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use storage::{CacheError, StorageError};
use thiserror::Error;
use tokio::task::JoinError;

pub type NPResult<T, E = NPError> = anyhow::Result<T, E>;
pub type StorageResult<T, E = StorageError> = Result<T, E>;

#[derive(Error, Debug, Default)]
pub enum NPError {
    /// The service is shutting down or was never started
    #[error("service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("{0}")]
    Msg(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Credential not found: {0}")]
    CredentialNotFound(String),
    #[error("Invalid resume request: {0}")]
    InvalidResume(String),
    #[error("Invalid state error: {0}")]
    InvalidStateError(String),

    #[error("Connection pool error: {0}")]
    PoolError(String),
    #[error(transparent)]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error(transparent)]
    JoinError(#[from] JoinError),
    #[error(transparent)]
    IoError(#[from] IoError),
    #[error(transparent)]
    Json(#[from] SerdeJsonError),
    #[error(transparent)]
    Anyhow(#[from] AnyhowError),
}

impl From<String> for NPError {
    #[inline]
    fn from(e: String) -> Self {
        NPError::Msg(e)
    }
}

impl From<&str> for NPError {
    #[inline]
    fn from(e: &str) -> Self {
        NPError::Msg(e.to_string())
    }
}

impl From<CacheError> for NPError {
    #[inline]
    fn from(e: CacheError) -> Self {
        NPError::StorageError(StorageError::Cache(e))
    }
}
