//! service-core: Shared infrastructure for the access-control services.
pub mod config;
pub mod error;
pub mod observability;

pub use tokio;
pub use tracing;
