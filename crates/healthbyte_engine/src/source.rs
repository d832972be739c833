//! Abstraction over the platform health data source.
//!
//! The engine never talks to a concrete platform API directly; it consumes
//! this trait so the aggregation and sync logic stays testable without a
//! device. The platform adapter lives in the host application.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

use crate::catalog::Unit;

/// One raw reading from the health source. Immutable, owned by the platform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantitySample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: Unit,
}

/// Last-known read grant for a single metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantStatus {
    Granted,
    Denied,
    Undetermined,
}

/// Whether an authorization request is still worth presenting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationRequestStatus {
    ShouldRequest,
    Unnecessary,
    Unknown,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("health data source unavailable")]
    Unavailable,
    #[error("platform error: {0}")]
    Platform(String),
}

#[async_trait]
pub trait HealthSource: Send + Sync + 'static {
    /// Whether this device has a health data source at all.
    async fn is_available(&self) -> bool;

    async fn authorization_request_status(
        &self,
        metric_ids: &[String],
    ) -> AuthorizationRequestStatus;

    /// Run the consent flow for the given metrics. `Ok(true)` means the
    /// request flow completed without a platform error; the platform does
    /// not report per-metric acceptance here.
    async fn request_authorization(&self, metric_ids: &[String]) -> Result<bool, SourceError>;

    async fn grant_status(&self, metric_id: &str) -> GrantStatus;

    /// All samples for a metric with `start <= timestamp < end`.
    async fn samples(
        &self,
        metric_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<QuantitySample>, SourceError>;

    /// Change notifications for a metric: the receiver observes a revision
    /// counter that is bumped whenever matching samples are added or
    /// changed. Subscribers recompute, they do not receive deltas.
    fn subscribe(&self, metric_id: &str) -> watch::Receiver<u64>;
}

#[derive(Default)]
struct MemoryInner {
    samples: HashMap<String, Vec<QuantitySample>>,
    grants: HashMap<String, GrantStatus>,
    revisions: HashMap<String, watch::Sender<u64>>,
    requested: bool,
}

/// In-memory [`HealthSource`] used by tests and examples. Grants start
/// `Undetermined`; `request_authorization` flips undetermined metrics to
/// granted, the way a consent dialog accepted wholesale would.
#[derive(Clone)]
pub struct MemoryHealthSource {
    available: bool,
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryHealthSource {
    pub fn new() -> Self {
        Self {
            available: true,
            inner: Arc::new(Mutex::new(MemoryInner::default())),
        }
    }

    /// A source behaving like a device without health capability.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            inner: Arc::new(Mutex::new(MemoryInner::default())),
        }
    }

    pub fn set_grant(&self, metric_id: &str, status: GrantStatus) {
        let mut inner = self.inner.lock().expect("source lock");
        inner.grants.insert(metric_id.to_string(), status);
    }

    /// Add a sample and notify live subscribers for that metric.
    pub fn add_sample(&self, metric_id: &str, sample: QuantitySample) {
        let mut inner = self.inner.lock().expect("source lock");
        inner
            .samples
            .entry(metric_id.to_string())
            .or_default()
            .push(sample);
        if let Some(tx) = inner.revisions.get(metric_id) {
            tx.send_modify(|rev| *rev += 1);
        }
    }
}

impl Default for MemoryHealthSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthSource for MemoryHealthSource {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn authorization_request_status(
        &self,
        _metric_ids: &[String],
    ) -> AuthorizationRequestStatus {
        if !self.available {
            return AuthorizationRequestStatus::Unknown;
        }
        let inner = self.inner.lock().expect("source lock");
        if inner.requested {
            AuthorizationRequestStatus::Unnecessary
        } else {
            AuthorizationRequestStatus::ShouldRequest
        }
    }

    async fn request_authorization(&self, metric_ids: &[String]) -> Result<bool, SourceError> {
        if !self.available {
            return Err(SourceError::Unavailable);
        }
        let mut inner = self.inner.lock().expect("source lock");
        inner.requested = true;
        for id in metric_ids {
            let status = inner
                .grants
                .entry(id.clone())
                .or_insert(GrantStatus::Undetermined);
            if *status == GrantStatus::Undetermined {
                *status = GrantStatus::Granted;
            }
        }
        Ok(true)
    }

    async fn grant_status(&self, metric_id: &str) -> GrantStatus {
        let inner = self.inner.lock().expect("source lock");
        inner
            .grants
            .get(metric_id)
            .copied()
            .unwrap_or(GrantStatus::Undetermined)
    }

    async fn samples(
        &self,
        metric_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<QuantitySample>, SourceError> {
        let inner = self.inner.lock().expect("source lock");
        Ok(inner
            .samples
            .get(metric_id)
            .map(|all| {
                all.iter()
                    .filter(|s| s.timestamp >= start && s.timestamp < end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn subscribe(&self, metric_id: &str) -> watch::Receiver<u64> {
        let mut inner = self.inner.lock().expect("source lock");
        inner
            .revisions
            .entry(metric_id.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }
}
