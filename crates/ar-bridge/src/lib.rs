//! Loopback-only debug transport for IDE and agent integration.
//!
//! The daemon side is injected behind [`DebugHost`]; the bridge knows
//! nothing about adapters or the orchestrator's internals. Requests from
//! this transport are always marked `from_debug` - a confirmation
//! challenge can never be approved through it.

pub mod auth;
pub mod host;
pub mod rate_limit;
pub mod routes;

pub use auth::DebugAuthLayer;
pub use host::DebugHost;
pub use rate_limit::SourceRateLimitLayer;
pub use routes::{debug_router, serve, DebugServerConfig};
