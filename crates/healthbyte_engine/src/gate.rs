//! Read-permission handling in front of the health source.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::source::{AuthorizationRequestStatus, GrantStatus, HealthSource, SourceError};

impl From<SourceError> for EngineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable => EngineError::DataSourceUnavailable,
            SourceError::Platform(msg) => EngineError::Source(msg),
        }
    }
}

/// Per-metric grant snapshot for a set of metrics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizationSummary {
    pub granted: BTreeSet<String>,
    pub denied: BTreeSet<String>,
    pub undetermined: BTreeSet<String>,
}

impl AuthorizationSummary {
    /// Status text for display, e.g. "Sharing is 2 authorized, and 1 denied."
    pub fn description(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.granted.is_empty() {
            parts.push(format!("{} authorized", self.granted.len()));
        }
        if !self.denied.is_empty() {
            parts.push(format!("{} denied", self.denied.len()));
        }
        if !self.undetermined.is_empty() {
            parts.push(format!("{} undetermined", self.undetermined.len()));
        }
        if parts.is_empty() {
            return "Sharing status is unknown.".to_string();
        }
        if parts.len() > 1 {
            let last = parts.len() - 1;
            parts[last] = format!("and {}", parts[last]);
        }
        format!("Sharing is {}.", parts.join(", "))
    }
}

/// Requests and reports read permission for a set of metrics.
pub struct AuthorizationGate {
    source: Arc<dyn HealthSource>,
}

impl AuthorizationGate {
    pub fn new(source: Arc<dyn HealthSource>) -> Self {
        Self { source }
    }

    /// Non-blocking query against the source's last-known grants.
    pub async fn check_status(&self, metric_ids: &[String]) -> AuthorizationSummary {
        let mut summary = AuthorizationSummary::default();
        for id in metric_ids {
            let set = match self.source.grant_status(id).await {
                GrantStatus::Granted => &mut summary.granted,
                GrantStatus::Denied => &mut summary.denied,
                GrantStatus::Undetermined => &mut summary.undetermined,
            };
            set.insert(id.clone());
        }
        summary
    }

    /// Whether presenting the consent flow is still useful.
    pub async fn request_status(&self, metric_ids: &[String]) -> AuthorizationRequestStatus {
        self.source.authorization_request_status(metric_ids).await
    }

    /// Run the consent flow. Suspends until the platform responds. `true`
    /// means the request flow completed, not that every metric was accepted.
    pub async fn request_authorization(&self, metric_ids: &[String]) -> EngineResult<bool> {
        if !self.source.is_available().await {
            return Err(EngineError::DataSourceUnavailable);
        }
        tracing::info!(metrics = metric_ids.len(), "requesting health data authorization");
        let granted = self.source.request_authorization(metric_ids).await?;
        Ok(granted)
    }
}
