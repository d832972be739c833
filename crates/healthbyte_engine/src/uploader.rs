//! Idempotent upload of a computed weekly total to the remote store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use healthbyte_store::{ColumnValue, RemoteStore};

use crate::catalog::MetricCatalog;
use crate::error::{EngineError, EngineResult};

/// Confirmation of a completed upload.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadAck {
    pub metric_id: String,
    pub column: String,
    pub value: ColumnValue,
    pub user_id: Uuid,
}

type InFlightSet = Arc<Mutex<HashSet<(Uuid, String)>>>;

/// Removes the in-flight entry on every exit path, including errors.
struct InFlightGuard {
    set: InFlightSet,
    key: (Uuid, String),
}

impl InFlightGuard {
    fn acquire(set: &InFlightSet, user_id: Uuid, metric_id: &str) -> EngineResult<Self> {
        let key = (user_id, metric_id.to_string());
        let mut in_flight = set.lock().expect("in-flight lock");
        if !in_flight.insert(key.clone()) {
            return Err(EngineError::UploadInProgress);
        }
        Ok(Self {
            set: set.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.set.lock() {
            in_flight.remove(&self.key);
        }
    }
}

/// Sends a computed scalar to the per-user row of the remote table.
///
/// The write is an update-if-exists: the row is expected to exist from
/// account creation, and a write matching zero rows surfaces as
/// [`EngineError::RowNotFound`] rather than becoming an insert. Uploads for
/// the same `(user, metric)` pair are serialized at the call site; a second
/// call while one is in flight is rejected immediately. No automatic retry.
pub struct SyncUploader {
    store: Arc<dyn RemoteStore>,
    catalog: Arc<MetricCatalog>,
    table: String,
    in_flight: InFlightSet,
}

impl SyncUploader {
    pub fn new(store: Arc<dyn RemoteStore>, catalog: Arc<MetricCatalog>, table: impl Into<String>) -> Self {
        Self {
            store,
            catalog,
            table: table.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Upload for the store's authenticated identity.
    pub async fn upload_for_current_user(
        &self,
        metric_id: &str,
        total: f64,
    ) -> EngineResult<UploadAck> {
        self.upload(metric_id, total, self.store.current_user_id()).await
    }

    /// Upload a total for an explicit user. Exactly one remote round trip.
    pub async fn upload(
        &self,
        metric_id: &str,
        total: f64,
        user_id: Option<Uuid>,
    ) -> EngineResult<UploadAck> {
        let user_id = user_id.ok_or(EngineError::Unauthenticated)?;
        let descriptor = self.catalog.require(metric_id)?;
        if descriptor.remote_column.is_empty() {
            return Err(EngineError::UnmappedMetric(metric_id.to_string()));
        }

        let _guard = InFlightGuard::acquire(&self.in_flight, user_id, metric_id)?;

        let value = if descriptor.integral {
            ColumnValue::Integer(total.round() as i64)
        } else {
            ColumnValue::Float(total)
        };

        let affected = self
            .store
            .update_column(&self.table, &descriptor.remote_column, value, user_id)
            .await?;
        if affected == 0 {
            return Err(EngineError::RowNotFound(user_id));
        }

        tracing::info!(
            metric = %metric_id,
            column = %descriptor.remote_column,
            "weekly total uploaded"
        );
        Ok(UploadAck {
            metric_id: metric_id.to_string(),
            column: descriptor.remote_column.clone(),
            value,
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use healthbyte_store::StoreError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Notify;

    /// Store stub with a configurable affected-row count and an optional
    /// gate that holds requests open until released.
    struct StubStore {
        user: Option<Uuid>,
        affected: u64,
        fail: bool,
        calls: AtomicU64,
        hold: Option<Arc<Notify>>,
    }

    impl StubStore {
        fn with_user(user: Uuid) -> Self {
            Self {
                user: Some(user),
                affected: 1,
                fail: false,
                calls: AtomicU64::new(0),
                hold: None,
            }
        }
    }

    #[async_trait]
    impl RemoteStore for StubStore {
        async fn update_column(
            &self,
            _table: &str,
            _column: &str,
            _value: ColumnValue,
            _auth_id: Uuid,
        ) -> Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            if self.fail {
                return Err(StoreError::Server {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(self.affected)
        }

        async fn insert_row(
            &self,
            _table: &str,
            _row: serde_json::Value,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        fn current_user_id(&self) -> Option<Uuid> {
            self.user
        }
    }

    fn uploader(store: StubStore) -> SyncUploader {
        SyncUploader::new(
            Arc::new(store),
            Arc::new(MetricCatalog::builtin()),
            "Patient",
        )
    }

    #[tokio::test]
    async fn missing_user_is_unauthenticated() {
        let mut store = StubStore::with_user(Uuid::new_v4());
        store.user = None;
        let up = uploader(store);
        let err = up
            .upload_for_current_user("stepCount", 3500.0)
            .await
            .expect_err("no user");
        assert!(matches!(err, EngineError::Unauthenticated));
    }

    #[tokio::test]
    async fn unknown_metric_is_rejected_before_any_network_call() {
        let user = Uuid::new_v4();
        let up = uploader(StubStore::with_user(user));
        let err = up
            .upload("heartRate", 1.0, Some(user))
            .await
            .expect_err("unknown metric");
        assert!(matches!(err, EngineError::UnknownMetric(_)));
    }

    #[tokio::test]
    async fn integral_column_rounds_to_nearest() {
        let user = Uuid::new_v4();
        let up = uploader(StubStore::with_user(user));
        let ack = up.upload("stepCount", 3499.6, Some(user)).await.expect("ack");
        assert_eq!(ack.value, ColumnValue::Integer(3500));
        assert_eq!(ack.column, "stepCount");
    }

    #[tokio::test]
    async fn fractional_column_keeps_precision() {
        let user = Uuid::new_v4();
        let up = uploader(StubStore::with_user(user));
        let ack = up
            .upload("sixMinuteWalkTestDistance", 130.25, Some(user))
            .await
            .expect("ack");
        assert_eq!(ack.value, ColumnValue::Float(130.25));
        assert_eq!(ack.column, "sixMinuteWalkMeters");
    }

    #[tokio::test]
    async fn zero_rows_affected_is_row_not_found() {
        let user = Uuid::new_v4();
        let mut store = StubStore::with_user(user);
        store.affected = 0;
        let up = uploader(store);
        let err = up
            .upload("stepCount", 3500.0, Some(user))
            .await
            .expect_err("missing row");
        assert!(matches!(err, EngineError::RowNotFound(u) if u == user));
    }

    #[tokio::test]
    async fn concurrent_upload_for_same_pair_is_rejected() {
        let user = Uuid::new_v4();
        let hold = Arc::new(Notify::new());
        let mut store = StubStore::with_user(user);
        store.hold = Some(hold.clone());
        let up = Arc::new(uploader(store));

        let first = {
            let up = up.clone();
            tokio::spawn(async move { up.upload("stepCount", 3500.0, Some(user)).await })
        };
        // Let the first call reach the store and park there.
        tokio::task::yield_now().await;

        let err = up
            .upload("stepCount", 9999.0, Some(user))
            .await
            .expect_err("second call must be rejected");
        assert!(matches!(err, EngineError::UploadInProgress));

        // A different metric for the same user is not blocked by the guard.
        let other = {
            let up = up.clone();
            tokio::spawn(async move { up.upload("sixMinuteWalkTestDistance", 130.0, Some(user)).await })
        };
        tokio::task::yield_now().await;

        // Releasing the gate lets both held calls finish; the first call's
        // result is unaffected by the rejected one.
        hold.notify_waiters();
        let ack = first.await.expect("join").expect("first upload");
        assert_eq!(ack.value, ColumnValue::Integer(3500));
        let other = other.await.expect("join").expect("other metric upload");
        assert_eq!(other.column, "sixMinuteWalkMeters");
    }

    #[tokio::test]
    async fn guard_is_released_after_failure_so_manual_retry_works() {
        let user = Uuid::new_v4();
        let mut store = StubStore::with_user(user);
        store.fail = true;
        let up = uploader(store);

        let err = up
            .upload("stepCount", 100.0, Some(user))
            .await
            .expect_err("store failure");
        assert!(matches!(err, EngineError::Store(_)));

        // Same pair again: the in-flight entry must be gone.
        let err = up
            .upload("stepCount", 100.0, Some(user))
            .await
            .expect_err("store still failing");
        assert!(matches!(err, EngineError::Store(_)));
    }
}
