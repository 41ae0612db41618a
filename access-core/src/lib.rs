//! Access-control and session-security core.
//!
//! Role/permission resolution, password and MFA authentication, session
//! lifecycle, encryption at rest and a queryable audit trail, exposed through
//! [`AccessCore`].

pub mod access;
pub mod clock;
pub mod config;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::access::{AccessCore, AccessCoreBuilder, ReapReport, AUDIT_LOG_RESOURCE};
pub use crate::services::AccessError;
