//! Minimal `RemoteStore` trait and a PostgREST-backed reqwest implementation.
//!
//! The store holds one row per patient, keyed by the authenticated user's
//! uuid. The engine only ever updates individual columns of that row; it
//! never creates rows (those come from account creation).

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod http_client;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn from_status(status: u16, body: String) -> Self {
        StoreError::Server { status, body }
    }
}

/// A column value in its declared numeric representation. Integral columns
/// must receive a JSON integer, not a float that happens to be whole.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnValue {
    Integer(i64),
    Float(f64),
}

impl Serialize for ColumnValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ColumnValue::Integer(v) => serializer.serialize_i64(*v),
            ColumnValue::Float(v) => serializer.serialize_f64(*v),
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Update one column of the row whose key column equals `auth_id`.
    /// Strictly update-if-exists: a filter matching no rows affects zero
    /// rows and must be reported as such, never turned into an insert.
    /// Returns the number of rows affected.
    async fn update_column(
        &self,
        table: &str,
        column: &str,
        value: ColumnValue,
        auth_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Insert a new row. Used by account-creation flows, not by the sync
    /// engine.
    async fn insert_row(&self, table: &str, row: serde_json::Value) -> Result<(), StoreError>;

    /// The authenticated identity this client acts as, if any.
    fn current_user_id(&self) -> Option<Uuid>;
}
