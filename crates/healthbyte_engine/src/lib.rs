//! Aggregation-and-sync engine for weekly health metrics.
//!
//! The engine ingests timestamped quantity samples from a health source,
//! aggregates them into calendar-day buckets over a trailing window, keeps
//! the bucket set live-updated, projects a weekly total under each metric's
//! aggregation policy, and uploads that total to the signed-in user's row
//! in the remote store.
//!
//! All platform and network seams are traits ([`HealthSource`],
//! [`healthbyte_store::RemoteStore`]) so the engine runs unchanged against
//! a device backend, a mock server, or the in-memory fakes used in tests.

pub mod catalog;
pub mod error;
pub mod gate;
pub mod projector;
pub mod query;
pub mod source;
pub mod uploader;
pub mod workflow;

/// Trailing window used by the weekly screens.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

pub use catalog::{AggregationPolicy, MetricCatalog, MetricDescriptor, Unit};
pub use error::{EngineError, EngineResult};
pub use gate::{AuthorizationGate, AuthorizationSummary};
pub use projector::weekly_total;
pub use query::{
    AggregationSession, BucketSnapshot, DailyBucket, LiveAggregator, SessionHandle, daily_buckets,
};
pub use source::{
    AuthorizationRequestStatus, GrantStatus, HealthSource, MemoryHealthSource, QuantitySample,
    SourceError,
};
pub use uploader::{SyncUploader, UploadAck};
pub use workflow::{
    AuthorizationRequester, EngineEvent, LiveAggregationSource, MetricWorkflow, Uploader,
    WorkflowState,
};
