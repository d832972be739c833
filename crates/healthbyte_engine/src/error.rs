//! Custom error types for the aggregation-and-sync engine.

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The device has no health data source at all. Fatal for the feature,
    /// not for the process.
    #[error("health data source unavailable on this device")]
    DataSourceUnavailable,

    #[error("metric {0} is not authorized for reading")]
    NotAuthorized(String),

    #[error("metric {0} is not in the catalog")]
    UnknownMetric(String),

    #[error("aggregation window must be at least one day, got {0}")]
    InvalidWindow(u32),

    #[error("an aggregation session for metric {0} is already active")]
    SessionActive(String),

    #[error("no authenticated user; sign in before syncing")]
    Unauthenticated,

    #[error("metric {0} has no remote column mapping")]
    UnmappedMetric(String),

    #[error("no remote row exists for user {0}")]
    RowNotFound(uuid::Uuid),

    #[error("an upload for this user and metric is already in flight")]
    UploadInProgress,

    #[error("remote store error: {0}")]
    Store(#[from] healthbyte_store::StoreError),

    /// Bad static configuration, e.g. a duplicate catalog id. Worth a hard
    /// failure at startup, never at runtime.
    #[error("catalog configuration error: {0}")]
    Catalog(String),

    #[error("health source error: {0}")]
    Source(String),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
