//! Append-only audit trail with a bounded in-memory view.

use std::sync::Arc;

use super::error::AccessError;
use super::metrics;
use super::notifier::SecurityNotifier;
use crate::models::{AuditEvent, AuditQuery};
use crate::store::AuditRepository;

#[derive(Clone)]
pub struct AuditLog {
    repo: Arc<dyn AuditRepository>,
    notifier: Arc<dyn SecurityNotifier>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditRepository>, notifier: Arc<dyn SecurityNotifier>) -> Self {
        Self { repo, notifier }
    }

    /// Stores the event. High and critical events are also handed to the
    /// notifier on a detached task; its outcome never affects the caller.
    pub async fn append(&self, event: AuditEvent) -> Result<(), AccessError> {
        let escalated = event.metadata.severity.is_escalated();
        let notification = escalated.then(|| event.clone());
        let action = event.action.clone();

        let evicted = self.repo.append(event).await.map_err(|e| {
            tracing::error!(error = %e, action = %action, "Failed to write audit event");
            AccessError::Internal(e)
        })?;
        metrics::record_audit_event(&action);
        if evicted > 0 {
            tracing::debug!(evicted, "Audit ring at capacity, dropped oldest events");
        }

        if let Some(event) = notification {
            let notifier = Arc::clone(&self.notifier);
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&event).await {
                    tracing::warn!(
                        error = %e,
                        event_id = %event.event_id,
                        "Security notification failed"
                    );
                }
            });
        }
        Ok(())
    }

    /// Matching events, most recent first.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AccessError> {
        Ok(self.repo.query(query).await?)
    }

    /// Chronological copy of everything retained, for durable sinks.
    pub async fn export(&self) -> Result<Vec<AuditEvent>, AccessError> {
        Ok(self.repo.snapshot().await?)
    }

    pub async fn len(&self) -> Result<usize, AccessError> {
        Ok(self.repo.len().await?)
    }

    pub async fn is_empty(&self) -> Result<bool, AccessError> {
        Ok(self.len().await? == 0)
    }
}
