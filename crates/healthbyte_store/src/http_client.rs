//! HTTP client implementation for a PostgREST-style remote store.
//!
//! This module provides a reqwest-based implementation of the
//! [`RemoteStore`](crate::RemoteStore) trait against a Supabase/PostgREST
//! endpoint.

use crate::{ColumnValue, RemoteStore, StoreError};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

/// Column used to select the patient row. Matches the Patient table schema.
const KEY_COLUMN: &str = "authId";

/// Remote store client using reqwest against a PostgREST endpoint.
#[derive(Clone, Debug)]
pub struct PostgrestStore {
    base_url: String,
    api_key: SecretString,
    user_id: Option<Uuid>,
    client: reqwest::Client,
}

impl PostgrestStore {
    /// Create a new client instance.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the store (e.g., "https://xyz.supabase.co")
    /// * `api_key` - The anon/service API key
    /// * `user_id` - The already-authenticated identity this client acts as
    pub fn new(base_url: &str, api_key: SecretString, user_id: Option<Uuid>) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("reqwest client build should not fail");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            user_id,
            client,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach the api key and bearer token headers.
    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", self.api_key.expose_secret())
            .bearer_auth(self.api_key.expose_secret())
    }

    /// Extract error information from a failed response.
    async fn error_from_response(&self, resp: reqwest::Response) -> StoreError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let body_snippet: String = body.chars().take(256).collect();

        match status {
            404 => StoreError::NotFound(body_snippet),
            401 | 403 => StoreError::Auth(body_snippet),
            422 => StoreError::InvalidInput(body_snippet),
            _ => StoreError::from_status(status, body_snippet),
        }
    }
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn update_column(
        &self,
        table: &str,
        column: &str,
        value: ColumnValue,
        auth_id: Uuid,
    ) -> Result<u64, StoreError> {
        let url = self.table_url(table);
        // PostgREST filter syntax; uuids are stored lowercased.
        let filter = format!("eq.{}", auth_id.to_string().to_lowercase());
        let payload = serde_json::json!({ column: value });

        let resp = self
            .authed(self.client.patch(&url))
            .query(&[(KEY_COLUMN, filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        // With return=representation the body is the array of updated rows;
        // its length is the affected-row count.
        let rows: Vec<serde_json::Value> = resp.json().await?;
        let affected = rows.len() as u64;
        tracing::debug!(table, column, affected, "column update completed");
        Ok(affected)
    }

    async fn insert_row(&self, table: &str, row: serde_json::Value) -> Result<(), StoreError> {
        let url = self.table_url(table);
        let resp = self
            .authed(self.client.post(&url))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        Ok(())
    }

    fn current_user_id(&self) -> Option<Uuid> {
        self.user_id
    }
}
