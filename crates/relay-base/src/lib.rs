//! Process-wide infrastructure shared by relay agents: environment-driven
//! settings, the durable job store, the upstream rate limiter, axum server
//! plumbing, prometheus metrics, and tracing initialisation.

#![forbid(unsafe_code)]

pub mod db;
pub mod metrics;
pub mod rate_limiter;
pub mod server;
pub mod settings;
pub mod trace;

pub use db::{JobStore, JobUpdate, StoreError};
pub use metrics::CoreMetrics;
pub use rate_limiter::RateLimiter;
pub use settings::Settings;
