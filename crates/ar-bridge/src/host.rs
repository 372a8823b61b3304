use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use ar_telemetry::MetricsCollector;

/// The daemon surface exposed to the debug transport.
///
/// Implemented by the orchestrator; every entrypoint here runs with
/// `from_debug = true`, which the confirmation flow treats as an
/// unconditional rejection.
#[async_trait]
pub trait DebugHost: Send + Sync {
    /// Uptime, instance id, backend-configured flag, recent activity.
    async fn status(&self) -> Value;

    /// Readiness: overall flag plus a named checks map.
    async fn readiness(&self) -> (bool, Value);

    /// One conversation turn. Errors are operator-displayable strings.
    async fn debug_ask(&self, message: String) -> Result<Value, String>;

    /// One shell command through the governed execution pipeline.
    async fn debug_run(&self, command: String) -> Result<Value, String>;

    /// One vision analysis (screen or camera).
    async fn debug_see(&self, use_camera: bool) -> Result<Value, String>;

    /// Metrics registry rendered by `/debug/metrics`.
    fn metrics(&self) -> Arc<MetricsCollector>;
}
