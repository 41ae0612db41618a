pub mod logging;

pub use logging::{custom_span, init_tracing, shutdown_tracing, TracingSettings};
