//! Windowed daily aggregation over raw samples, with live-updating sessions.
//!
//! The bucketing itself is a pure function; [`LiveAggregator`] wraps it in a
//! session that recomputes on every sample change and on local midnight
//! rollover, publishing whole snapshots. Consumers always see a complete
//! bucket set or the previous complete one, never a partial update.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::catalog::{AggregationPolicy, MetricCatalog};
use crate::error::{EngineError, EngineResult};
use crate::source::{GrantStatus, HealthSource, QuantitySample, SourceError};

/// Aggregate over one calendar day. The last bucket of a window covers only
/// the elapsed portion of today.
#[derive(Clone, Debug, PartialEq)]
pub struct DailyBucket {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub value: f64,
    pub sample_count: usize,
}

impl DailyBucket {
    pub fn has_samples(&self) -> bool {
        self.sample_count > 0
    }
}

/// One atomic result of an aggregation pass. Snapshots supersede each other
/// by `computed_through`; the later end always wins.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketSnapshot {
    pub metric_id: String,
    pub buckets: Vec<DailyBucket>,
    pub computed_through: DateTime<Utc>,
}

/// Start-of-day instant for a local calendar day.
fn local_day_start(day: NaiveDate, tz: FixedOffset) -> DateTime<Utc> {
    let local = day.and_time(NaiveTime::MIN);
    let utc = local - Duration::seconds(i64::from(tz.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, Utc)
}

fn until_next_midnight(now: DateTime<Utc>, tz: FixedOffset) -> std::time::Duration {
    let tomorrow = now.with_timezone(&tz).date_naive() + Duration::days(1);
    (local_day_start(tomorrow, tz) - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
}

/// Partition the trailing window into one bucket per local calendar day and
/// aggregate the samples falling in each day.
///
/// Day boundaries are phased on local midnight, not UTC midnight or request
/// time. A day with no samples yields value 0 so downstream reduction stays
/// well-defined.
pub fn daily_buckets(
    samples: &[QuantitySample],
    policy: AggregationPolicy,
    window_days: u32,
    now: DateTime<Utc>,
    tz: FixedOffset,
) -> Vec<DailyBucket> {
    let today = now.with_timezone(&tz).date_naive();
    let mut buckets = Vec::with_capacity(window_days as usize);
    for back in (0..i64::from(window_days)).rev() {
        let day = today - Duration::days(back);
        let window_start = local_day_start(day, tz);
        let window_end = local_day_start(day + Duration::days(1), tz).min(now);
        let in_day: Vec<&QuantitySample> = samples
            .iter()
            .filter(|s| s.timestamp >= window_start && s.timestamp < window_end)
            .collect();
        let value = match policy {
            AggregationPolicy::Sum => in_day.iter().map(|s| s.value).sum(),
            AggregationPolicy::MostRecent => in_day
                .iter()
                .max_by_key(|s| s.timestamp)
                .map(|s| s.value)
                .unwrap_or(0.0),
        };
        buckets.push(DailyBucket {
            window_start,
            window_end,
            value,
            sample_count: in_day.len(),
        });
    }
    buckets
}

/// Cancellation handle for a live session. Cloneable so the owner of the
/// snapshot stream and the teardown path can be different tasks.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    metric_id: String,
    stopped: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
    registry: Arc<Mutex<HashSet<String>>>,
}

impl SessionHandle {
    /// Stop the live subscription. After this returns no further snapshot
    /// is observable through the session. Stopping twice is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.cancel.send(true);
        if let Ok(mut active) = self.registry.lock() {
            active.remove(&self.metric_id);
        }
        tracing::debug!(metric = %self.metric_id, "aggregation session stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A live query for one metric. At most one per metric may be active.
#[derive(Debug)]
pub struct AggregationSession {
    handle: SessionHandle,
    rx: watch::Receiver<Option<BucketSnapshot>>,
}

impl AggregationSession {
    pub fn metric_id(&self) -> &str {
        &self.handle.metric_id
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// The most recently delivered snapshot, if any. `None` after stop.
    pub fn latest(&self) -> Option<BucketSnapshot> {
        if self.handle.is_stopped() {
            return None;
        }
        self.rx.borrow().clone()
    }

    /// Wait for the next superseding snapshot. Returns `None` once the
    /// session is stopped or the producer has gone away.
    pub async fn next_snapshot(&mut self) -> Option<BucketSnapshot> {
        loop {
            if self.handle.is_stopped() {
                return None;
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
            if self.handle.is_stopped() {
                return None;
            }
            if let Some(snap) = self.rx.borrow_and_update().clone() {
                return Some(snap);
            }
        }
    }
}

impl Drop for AggregationSession {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

fn publish_if_newer(tx: &watch::Sender<Option<BucketSnapshot>>, snap: BucketSnapshot) {
    tx.send_if_modified(|current| match current {
        Some(prev) if prev.computed_through >= snap.computed_through => false,
        _ => {
            *current = Some(snap);
            true
        }
    });
}

async fn compute_snapshot(
    source: &dyn HealthSource,
    metric_id: &str,
    policy: AggregationPolicy,
    window_days: u32,
    tz: FixedOffset,
) -> Result<BucketSnapshot, SourceError> {
    let now = Utc::now();
    let today = now.with_timezone(&tz).date_naive();
    let start = local_day_start(today - Duration::days(i64::from(window_days) - 1), tz);
    let samples = source.samples(metric_id, start, now).await?;
    Ok(BucketSnapshot {
        metric_id: metric_id.to_string(),
        buckets: daily_buckets(&samples, policy, window_days, now, tz),
        computed_through: now,
    })
}

/// Factory for live aggregation sessions over one health source.
pub struct LiveAggregator {
    source: Arc<dyn HealthSource>,
    catalog: Arc<MetricCatalog>,
    tz: FixedOffset,
    active: Arc<Mutex<HashSet<String>>>,
}

impl LiveAggregator {
    pub fn new(source: Arc<dyn HealthSource>, catalog: Arc<MetricCatalog>, tz: FixedOffset) -> Self {
        Self {
            source,
            catalog,
            tz,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    async fn check_metric(&self, metric_id: &str, window_days: u32) -> EngineResult<AggregationPolicy> {
        let descriptor = self.catalog.require(metric_id)?;
        if window_days < 1 {
            return Err(EngineError::InvalidWindow(window_days));
        }
        if self.source.grant_status(metric_id).await != GrantStatus::Granted {
            return Err(EngineError::NotAuthorized(metric_id.to_string()));
        }
        Ok(descriptor.policy)
    }

    /// One-shot aggregation pass over the source's current samples.
    pub async fn fresh_buckets(
        &self,
        metric_id: &str,
        window_days: u32,
    ) -> EngineResult<Vec<DailyBucket>> {
        let policy = self.check_metric(metric_id, window_days).await?;
        let snap = compute_snapshot(self.source.as_ref(), metric_id, policy, window_days, self.tz)
            .await?;
        Ok(snap.buckets)
    }

    /// Start a live session: an immediate snapshot, then one per sample
    /// change and per midnight rollover, until the session is stopped.
    pub async fn start_session(
        &self,
        metric_id: &str,
        window_days: u32,
    ) -> EngineResult<AggregationSession> {
        let policy = self.check_metric(metric_id, window_days).await?;
        {
            let mut active = self.active.lock().expect("session registry lock");
            if !active.insert(metric_id.to_string()) {
                return Err(EngineError::SessionActive(metric_id.to_string()));
            }
        }

        let (tx, rx) = watch::channel(None);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let handle = SessionHandle {
            metric_id: metric_id.to_string(),
            stopped: Arc::new(AtomicBool::new(false)),
            cancel: cancel_tx,
            registry: self.active.clone(),
        };

        let source = self.source.clone();
        let tz = self.tz;
        let id = metric_id.to_string();
        tokio::spawn(async move {
            let mut revision = source.subscribe(&id);
            loop {
                if *cancel_rx.borrow() {
                    break;
                }
                match compute_snapshot(source.as_ref(), &id, policy, window_days, tz).await {
                    Ok(snap) => publish_if_newer(&tx, snap),
                    Err(err) => {
                        tracing::warn!(metric = %id, error = %err, "statistics pass failed")
                    }
                }
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    changed = revision.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(until_next_midnight(Utc::now(), tz)) => {}
                }
            }
            tracing::debug!(metric = %id, "aggregation task exited");
        });

        tracing::info!(metric = %metric_id, window_days, "aggregation session started");
        Ok(AggregationSession { handle, rx })
    }
}
