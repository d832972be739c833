//! Per-metric workflow driver.
//!
//! Screens do not subclass anything; they hold a [`MetricWorkflow`] built
//! from three injected capabilities (authorization, live aggregation,
//! upload) and read [`EngineEvent`]s off a channel.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalog::{AggregationPolicy, MetricCatalog};
use crate::error::{EngineError, EngineResult};
use crate::gate::AuthorizationGate;
use crate::projector::weekly_total;
use crate::query::{AggregationSession, DailyBucket, LiveAggregator, SessionHandle};
use crate::uploader::{SyncUploader, UploadAck};

/// Requests read permission and reports grant status text.
#[async_trait]
pub trait AuthorizationRequester: Send + Sync {
    async fn request(&self, metric_ids: &[String]) -> EngineResult<bool>;
    async fn status_text(&self, metric_ids: &[String]) -> String;
}

#[async_trait]
impl AuthorizationRequester for AuthorizationGate {
    async fn request(&self, metric_ids: &[String]) -> EngineResult<bool> {
        self.request_authorization(metric_ids).await
    }

    async fn status_text(&self, metric_ids: &[String]) -> String {
        self.check_status(metric_ids).await.description()
    }
}

/// Produces live and one-shot daily bucket aggregations.
#[async_trait]
pub trait LiveAggregationSource: Send + Sync {
    async fn start(&self, metric_id: &str, window_days: u32) -> EngineResult<AggregationSession>;
    async fn fresh(&self, metric_id: &str, window_days: u32) -> EngineResult<Vec<DailyBucket>>;
}

#[async_trait]
impl LiveAggregationSource for LiveAggregator {
    async fn start(&self, metric_id: &str, window_days: u32) -> EngineResult<AggregationSession> {
        self.start_session(metric_id, window_days).await
    }

    async fn fresh(&self, metric_id: &str, window_days: u32) -> EngineResult<Vec<DailyBucket>> {
        self.fresh_buckets(metric_id, window_days).await
    }
}

/// Sends a computed total to the remote store for the signed-in user.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload_total(&self, metric_id: &str, total: f64) -> EngineResult<UploadAck>;
}

#[async_trait]
impl Uploader for SyncUploader {
    async fn upload_total(&self, metric_id: &str, total: f64) -> EngineResult<UploadAck> {
        self.upload_for_current_user(metric_id, total).await
    }
}

/// What the UI layer receives from the engine.
#[derive(Debug)]
pub enum EngineEvent {
    AuthorizationStatus {
        description: String,
    },
    /// A complete superseding bucket set plus its projected total.
    BucketsUpdated {
        metric_id: String,
        buckets: Vec<DailyBucket>,
        weekly_total: f64,
    },
    /// Discrete upload outcome; errors arrive as display text, never
    /// through the live-update stream.
    UploadFinished {
        metric_id: String,
        result: Result<UploadAck, String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Authorizing,
    Active,
    Uploading,
    Stopped,
}

/// Drives one metric through authorize, live updates, upload and teardown.
pub struct MetricWorkflow {
    metric_id: String,
    window_days: u32,
    policy: AggregationPolicy,
    gate: Arc<dyn AuthorizationRequester>,
    aggregator: Arc<dyn LiveAggregationSource>,
    uploader: Arc<dyn Uploader>,
    events: mpsc::Sender<EngineEvent>,
    state: WorkflowState,
    session: Option<SessionHandle>,
    forward: Option<JoinHandle<()>>,
}

impl MetricWorkflow {
    pub fn new(
        catalog: &MetricCatalog,
        metric_id: &str,
        window_days: u32,
        gate: Arc<dyn AuthorizationRequester>,
        aggregator: Arc<dyn LiveAggregationSource>,
        uploader: Arc<dyn Uploader>,
        events: mpsc::Sender<EngineEvent>,
    ) -> EngineResult<Self> {
        let descriptor = catalog.require(metric_id)?;
        Ok(Self {
            metric_id: metric_id.to_string(),
            window_days,
            policy: descriptor.policy,
            gate,
            aggregator,
            uploader,
            events,
            state: WorkflowState::Idle,
            session: None,
            forward: None,
        })
    }

    pub fn metric_id(&self) -> &str {
        &self.metric_id
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Authorize, start the live session and begin forwarding bucket
    /// updates. Valid from `Idle` only; re-entrant starts are a caller
    /// error.
    pub async fn activate(&mut self) -> EngineResult<()> {
        if self.state != WorkflowState::Idle {
            return Err(EngineError::SessionActive(self.metric_id.clone()));
        }
        self.state = WorkflowState::Authorizing;

        let metrics = vec![self.metric_id.clone()];
        let granted = match self.gate.request(&metrics).await {
            Ok(granted) => granted,
            Err(err) => {
                self.state = WorkflowState::Idle;
                return Err(err);
            }
        };
        let description = self.gate.status_text(&metrics).await;
        let _ = self
            .events
            .send(EngineEvent::AuthorizationStatus { description })
            .await;
        if !granted {
            self.state = WorkflowState::Idle;
            return Err(EngineError::NotAuthorized(self.metric_id.clone()));
        }

        let mut session = match self.aggregator.start(&self.metric_id, self.window_days).await {
            Ok(session) => session,
            Err(err) => {
                self.state = WorkflowState::Idle;
                return Err(err);
            }
        };
        self.session = Some(session.handle());

        let events = self.events.clone();
        let policy = self.policy;
        self.forward = Some(tokio::spawn(async move {
            while let Some(snapshot) = session.next_snapshot().await {
                let total = weekly_total(&snapshot.buckets, policy);
                let event = EngineEvent::BucketsUpdated {
                    metric_id: snapshot.metric_id,
                    buckets: snapshot.buckets,
                    weekly_total: total,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }));

        self.state = WorkflowState::Active;
        Ok(())
    }

    /// Upload the current weekly total. The total is recomputed from the
    /// source's current samples at upload time, not read from the last
    /// delivered snapshot. A failed upload leaves the workflow `Active` for
    /// manual retry; there is no automatic retry.
    pub async fn upload(&mut self) -> EngineResult<UploadAck> {
        if self.state != WorkflowState::Active {
            return Err(EngineError::NotAuthorized(self.metric_id.clone()));
        }
        self.state = WorkflowState::Uploading;
        let result = self.run_upload().await;
        self.state = WorkflowState::Active;

        let event = EngineEvent::UploadFinished {
            metric_id: self.metric_id.clone(),
            result: match &result {
                Ok(ack) => Ok(ack.clone()),
                Err(err) => Err(err.to_string()),
            },
        };
        let _ = self.events.send(event).await;
        result
    }

    async fn run_upload(&self) -> EngineResult<UploadAck> {
        let buckets = self.aggregator.fresh(&self.metric_id, self.window_days).await?;
        let total = weekly_total(&buckets, self.policy);
        self.uploader.upload_total(&self.metric_id, total).await
    }

    /// Tear down the live subscription. Safe from any state, idempotent,
    /// and no bucket update is delivered after it returns.
    pub fn stop(&mut self) {
        if self.state == WorkflowState::Stopped {
            return;
        }
        if let Some(handle) = self.session.take() {
            handle.stop();
        }
        if let Some(task) = self.forward.take() {
            task.abort();
        }
        self.state = WorkflowState::Stopped;
    }
}

impl Drop for MetricWorkflow {
    fn drop(&mut self) {
        self.stop();
    }
}
