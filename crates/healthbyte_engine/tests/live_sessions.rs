use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use healthbyte_engine::{
    DEFAULT_WINDOW_DAYS, EngineError, GrantStatus, LiveAggregator, MemoryHealthSource,
    MetricCatalog, QuantitySample, Unit,
};

fn aggregator(source: &MemoryHealthSource) -> LiveAggregator {
    LiveAggregator::new(
        Arc::new(source.clone()),
        Arc::new(MetricCatalog::builtin()),
        FixedOffset::east_opt(0).expect("offset"),
    )
}

fn step_sample(value: f64) -> QuantitySample {
    QuantitySample {
        timestamp: Utc::now(),
        value,
        unit: Unit::Count,
    }
}

#[tokio::test]
async fn unknown_metric_is_rejected() {
    let source = MemoryHealthSource::new();
    let agg = aggregator(&source);
    let err = agg
        .start_session("heartRate", DEFAULT_WINDOW_DAYS)
        .await
        .expect_err("not in catalog");
    assert!(matches!(err, EngineError::UnknownMetric(_)));
}

#[tokio::test]
async fn unauthorized_metric_is_rejected() {
    let source = MemoryHealthSource::new();
    let agg = aggregator(&source);
    let err = agg
        .start_session("stepCount", DEFAULT_WINDOW_DAYS)
        .await
        .expect_err("no grant yet");
    assert!(matches!(err, EngineError::NotAuthorized(_)));
}

#[tokio::test]
async fn zero_day_window_is_rejected() {
    let source = MemoryHealthSource::new();
    source.set_grant("stepCount", GrantStatus::Granted);
    let agg = aggregator(&source);
    let err = agg
        .start_session("stepCount", 0)
        .await
        .expect_err("window too small");
    assert!(matches!(err, EngineError::InvalidWindow(0)));
}

#[tokio::test]
async fn session_delivers_initial_and_superseding_snapshots() {
    let source = MemoryHealthSource::new();
    source.set_grant("stepCount", GrantStatus::Granted);
    source.add_sample("stepCount", step_sample(1000.0));

    let agg = aggregator(&source);
    let mut session = agg
        .start_session("stepCount", DEFAULT_WINDOW_DAYS)
        .await
        .expect("session");

    let first = session.next_snapshot().await.expect("initial snapshot");
    assert_eq!(first.buckets.len(), DEFAULT_WINDOW_DAYS as usize);
    let total: f64 = first.buckets.iter().map(|b| b.value).sum();
    assert_eq!(total, 1000.0);

    source.add_sample("stepCount", step_sample(2500.0));
    let second = session.next_snapshot().await.expect("live update");
    assert!(second.computed_through > first.computed_through);
    let total: f64 = second.buckets.iter().map(|b| b.value).sum();
    assert_eq!(total, 3500.0);

    session.stop();
}

#[tokio::test]
async fn fresh_buckets_reflect_current_samples() {
    let source = MemoryHealthSource::new();
    source.set_grant("stepCount", GrantStatus::Granted);
    source.add_sample("stepCount", step_sample(700.0));

    let agg = aggregator(&source);
    let buckets = agg
        .fresh_buckets("stepCount", DEFAULT_WINDOW_DAYS)
        .await
        .expect("buckets");
    let total: f64 = buckets.iter().map(|b| b.value).sum();
    assert_eq!(total, 700.0);
}

#[tokio::test]
async fn second_session_for_same_metric_is_rejected_until_stop() {
    let source = MemoryHealthSource::new();
    source.set_grant("stepCount", GrantStatus::Granted);
    let agg = aggregator(&source);

    let session = agg
        .start_session("stepCount", DEFAULT_WINDOW_DAYS)
        .await
        .expect("first session");
    let err = agg
        .start_session("stepCount", DEFAULT_WINDOW_DAYS)
        .await
        .expect_err("one active session per metric");
    assert!(matches!(err, EngineError::SessionActive(_)));

    session.stop();
    let restarted = agg.start_session("stepCount", DEFAULT_WINDOW_DAYS).await;
    assert!(restarted.is_ok());
}

#[tokio::test]
async fn stop_prevents_further_delivery_and_is_idempotent() {
    let source = MemoryHealthSource::new();
    source.set_grant("stepCount", GrantStatus::Granted);
    let agg = aggregator(&source);

    let mut session = agg
        .start_session("stepCount", DEFAULT_WINDOW_DAYS)
        .await
        .expect("session");
    let _ = session.next_snapshot().await.expect("initial snapshot");

    session.stop();
    // Stopping an already-stopped session is a no-op, not an error.
    session.stop();

    assert!(session.latest().is_none());
    source.add_sample("stepCount", step_sample(999.0));
    assert!(session.next_snapshot().await.is_none());
}

#[tokio::test]
async fn dropping_a_session_releases_the_metric_slot() {
    let source = MemoryHealthSource::new();
    source.set_grant("stepCount", GrantStatus::Granted);
    let agg = aggregator(&source);

    {
        let _session = agg
            .start_session("stepCount", DEFAULT_WINDOW_DAYS)
            .await
            .expect("session");
    }
    // Teardown without an explicit stop still releases the subscription.
    let restarted = agg.start_session("stepCount", DEFAULT_WINDOW_DAYS).await;
    assert!(restarted.is_ok());
}
