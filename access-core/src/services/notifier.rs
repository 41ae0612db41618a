//! Security notification sink.
//!
//! The core only decides *that* an event deserves attention. Delivery is the
//! implementor's concern.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::models::AuditEvent;

#[async_trait]
pub trait SecurityNotifier: Send + Sync {
    async fn notify(&self, event: &AuditEvent) -> Result<(), anyhow::Error>;
}

/// Default sink: emits a warning-level log line per escalated event.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl SecurityNotifier for TracingNotifier {
    async fn notify(&self, event: &AuditEvent) -> Result<(), anyhow::Error> {
        tracing::warn!(
            event_id = %event.event_id,
            action = %event.action,
            resource = %event.resource,
            principal_id = ?event.principal_id,
            severity = ?event.metadata.severity,
            reason = ?event.metadata.reason,
            "Security notification"
        );
        Ok(())
    }
}

/// Keeps every notified event in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<AuditEvent>>,
    notify: Notify,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Waits until at least `count` events arrived or `timeout` passed.
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.events().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl SecurityNotifier for RecordingNotifier {
    async fn notify(&self, event: &AuditEvent) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Recording notifier mutex poisoned: {}", e))?
            .push(event.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, Severity};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_recording_notifier_wakes_waiters() {
        let notifier = Arc::new(RecordingNotifier::new());
        let sink = notifier.clone();
        tokio::spawn(async move {
            let event = AuditEvent::new(AuditAction::AccountLocked, "login", Utc::now())
                .severity(Severity::High);
            sink.notify(&event).await
        });

        assert!(notifier.wait_for(1, Duration::from_secs(2)).await);
        assert_eq!(notifier.events()[0].action, "account_locked");
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let notifier = RecordingNotifier::new();
        assert!(!notifier.wait_for(1, Duration::from_millis(20)).await);
    }
}
