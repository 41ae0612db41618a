use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

pub struct AccessMetrics {
    pub registry: Registry,
    pub access_decisions_total: IntCounterVec,
    pub login_attempts_total: IntCounterVec,
    pub sessions_issued_total: IntCounter,
    pub vault_failures_total: IntCounter,
    pub audit_events_total: IntCounterVec,
}

static METRICS: OnceLock<AccessMetrics> = OnceLock::new();

pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let access_decisions_total = IntCounterVec::new(
        Opts::new("access_decisions_total", "Authorization decisions by outcome"),
        &["outcome", "permission"],
    )
    .map_err(|e| anyhow::anyhow!("Failed to create access_decisions_total metric: {}", e))?;

    let login_attempts_total = IntCounterVec::new(
        Opts::new("login_attempts_total", "Login attempts by outcome"),
        &["outcome"],
    )
    .map_err(|e| anyhow::anyhow!("Failed to create login_attempts_total metric: {}", e))?;

    let sessions_issued_total = IntCounter::new("sessions_issued_total", "Sessions created")
        .map_err(|e| anyhow::anyhow!("Failed to create sessions_issued_total metric: {}", e))?;

    let vault_failures_total = IntCounter::new(
        "vault_decrypt_failures_total",
        "Blobs that failed authentication on decrypt",
    )
    .map_err(|e| anyhow::anyhow!("Failed to create vault_decrypt_failures_total metric: {}", e))?;

    let audit_events_total = IntCounterVec::new(
        Opts::new("audit_events_total", "Audit events appended by action"),
        &["action"],
    )
    .map_err(|e| anyhow::anyhow!("Failed to create audit_events_total metric: {}", e))?;

    registry.register(Box::new(access_decisions_total.clone()))?;
    registry.register(Box::new(login_attempts_total.clone()))?;
    registry.register(Box::new(sessions_issued_total.clone()))?;
    registry.register(Box::new(vault_failures_total.clone()))?;
    registry.register(Box::new(audit_events_total.clone()))?;

    // Losing the race to a concurrent init is fine; the winner's set is used.
    let _ = METRICS.set(AccessMetrics {
        registry,
        access_decisions_total,
        login_attempts_total,
        sessions_issued_total,
        vault_failures_total,
        audit_events_total,
    });
    tracing::debug!("Metrics registry initialized");
    Ok(())
}

pub fn record_access_decision(granted: bool, permission: &str) {
    if let Some(m) = METRICS.get() {
        let outcome = if granted { "granted" } else { "denied" };
        m.access_decisions_total
            .with_label_values(&[outcome, permission])
            .inc();
    }
}

pub fn record_login(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.login_attempts_total.with_label_values(&[outcome]).inc();
    }
}

pub fn record_session_issued() {
    if let Some(m) = METRICS.get() {
        m.sessions_issued_total.inc();
    }
}

pub fn record_vault_failure() {
    if let Some(m) = METRICS.get() {
        m.vault_failures_total.inc();
    }
}

pub fn record_audit_event(action: &str) {
    if let Some(m) = METRICS.get() {
        m.audit_events_total.with_label_values(&[action]).inc();
    }
}

pub fn render_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match METRICS.get() {
        Some(m) => &m.registry,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render_after_init() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        record_login("success");
        record_access_decision(false, "manage_system");

        let text = render_metrics();
        assert!(text.contains("login_attempts_total"));
        assert!(text.contains("access_decisions_total"));
    }
}
