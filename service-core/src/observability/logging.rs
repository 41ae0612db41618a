use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;

/// Identity and routing for the process-wide tracing pipeline.
#[derive(Debug, Clone)]
pub struct TracingSettings {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub log_level: String,
    /// OTLP gRPC collector, e.g. `http://otel-collector:4317`. `None` keeps
    /// logging local.
    pub otlp_endpoint: Option<String>,
}

pub fn init_tracing(settings: &TracingSettings) -> Result<(), AppError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level));

    fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .json()
            .flatten_event(true)
    }

    let Some(endpoint) = settings.otlp_endpoint.as_deref().filter(|e| !e.is_empty()) else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer())
            .try_init()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
        return Ok(());
    };

    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", settings.service_name.clone()),
            KeyValue::new("service.version", settings.service_version.clone()),
            KeyValue::new("deployment.environment", settings.environment.clone()),
        ])))
        .install_batch(runtime::Tokio)
        .map_err(|e| {
            eprintln!(
                "Failed to initialize OTLP tracer for service '{}' at endpoint '{}': {}",
                settings.service_name, endpoint, e
            );
            AppError::ConfigError(anyhow::anyhow!("Failed to initialize OTLP tracer: {}", e))
        })?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry)
        .with(fmt_layer())
        .try_init()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

    Ok(())
}

/// Flush pending spans before the process exits.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Create a span for manual instrumentation.
///
/// The span is exported under `name` and carries `attributes` as
/// OpenTelemetry attributes.
pub fn custom_span(name: &str, attributes: &[(&'static str, String)]) -> Span {
    let span = tracing::info_span!("custom_span", otel.name = %name);
    for (key, value) in attributes {
        span.set_attribute(*key, value.clone());
    }
    span
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_span_without_subscriber_is_disabled() {
        let span = custom_span("vault.derive_key", &[("principal_id", "u1".to_string())]);
        assert!(span.is_disabled());
    }
}
