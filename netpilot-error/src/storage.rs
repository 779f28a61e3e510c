use thiserror::Error;

/// Failures of the shared key-value cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A zero lifetime, or a deadline that already passed
    #[error("invalid cache expiry: {0}")]
    InvalidExpiry(String),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures of a persistence collaborator (inventory, credentials, backups).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("storage write failed: {0}")]
    WriteFailed(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl StorageError {
    #[inline]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
