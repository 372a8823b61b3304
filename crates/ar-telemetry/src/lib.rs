//! Telemetry surfaces for the daemon: the append-only audit sink, the
//! metrics collector behind `/debug/metrics`, and tracing bootstrap.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::AuditSink;
pub use metrics::MetricsCollector;
