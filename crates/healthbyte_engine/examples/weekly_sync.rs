use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use healthbyte_engine::{
    AuthorizationGate, DEFAULT_WINDOW_DAYS, EngineEvent, LiveAggregator, MemoryHealthSource,
    MetricCatalog, MetricWorkflow, QuantitySample, SyncUploader, Unit,
};
use healthbyte_store::config::StoreConfig;
use healthbyte_store::http_client::PostgrestStore;
use uuid::Uuid;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configure logging from env var `HEALTHBYTE_LOG_LEVEL` (or fallback to `RUST_LOG`, default `info`).
    let log_env = std::env::var("HEALTHBYTE_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&log_env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();

    // Example: expects SUPABASE_URL and SUPABASE_ANON_KEY in env, plus
    // HEALTHBYTE_USER_ID pointing at an existing Patient row.
    let cfg = match StoreConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(());
        }
    };
    let user_id = std::env::var("HEALTHBYTE_USER_ID")
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok());
    let store = Arc::new(PostgrestStore::new(&cfg.base_url, cfg.api_key, user_id));

    // A synthetic week of step samples stands in for the platform source.
    let source = MemoryHealthSource::new();
    for day in 0..7 {
        source.add_sample(
            "stepCount",
            QuantitySample {
                timestamp: Utc::now() - chrono::Duration::days(day),
                value: 1000.0 + 250.0 * day as f64,
                unit: Unit::Count,
            },
        );
    }

    let catalog = Arc::new(MetricCatalog::builtin());
    let source: Arc<MemoryHealthSource> = Arc::new(source);
    let (events_tx, mut events) = tokio::sync::mpsc::channel(16);
    let mut workflow = MetricWorkflow::new(
        &catalog,
        "stepCount",
        DEFAULT_WINDOW_DAYS,
        Arc::new(AuthorizationGate::new(source.clone())),
        Arc::new(LiveAggregator::new(
            source,
            catalog.clone(),
            FixedOffset::east_opt(0).expect("offset"),
        )),
        Arc::new(SyncUploader::new(store, catalog.clone(), "Patient")),
        events_tx,
    )?;

    workflow.activate().await?;
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::AuthorizationStatus { description } => println!("{description}"),
            EngineEvent::BucketsUpdated {
                buckets,
                weekly_total,
                ..
            } => {
                for b in &buckets {
                    println!("  {} .. {}  {}", b.window_start, b.window_end, b.value);
                }
                println!("weekly total: {weekly_total}");
                break;
            }
            EngineEvent::UploadFinished { .. } => {}
        }
    }

    match workflow.upload().await {
        Ok(ack) => println!("uploaded {:?} to column {}", ack.value, ack.column),
        Err(e) => eprintln!("upload failed: {e}"),
    }
    workflow.stop();
    Ok(())
}
