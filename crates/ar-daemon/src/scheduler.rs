//! Background scheduler: the heartbeat loop and the command-poll loop.
//!
//! Both loops share the bounded 429 backoff discipline, check the
//! shutdown signal between sleep and the next request, and never surface
//! errors to the operator - they log and back off. Authentication
//! failure (401) on the poll loop is unrecoverable from inside the loop
//! and stops it permanently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ar_harness::shutdown::join_with_timeout;
use ar_harness::RateLimitBackoff;
use ar_telemetry::metrics::Labels;

use crate::orchestrator::Orchestrator;

/// Stagger before the first heartbeat so it does not race the command
/// poll at startup.
const INITIAL_HEARTBEAT_DELAY: Duration = Duration::from_secs(2);
/// Bound on joining each loop during shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Join handles for the two scheduler tasks; owned by the orchestrator
/// and joined on shutdown.
pub struct SchedulerHandle {
    heartbeat: JoinHandle<()>,
    poll: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Join both loops with a bounded timeout each. The shutdown signal
    /// must already be triggered.
    pub async fn join(self) {
        join_with_timeout("heartbeat", self.heartbeat, JOIN_TIMEOUT).await;
        join_with_timeout("command-poll", self.poll, JOIN_TIMEOUT).await;
    }

    pub fn is_running(&self) -> bool {
        !self.heartbeat.is_finished() || !self.poll.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Start both loops, unless the backend is unconfigured or the token is
/// a known placeholder - unauthenticated heartbeats would only get
/// rate-limited.
pub fn start(orch: &Arc<Orchestrator>) -> Option<SchedulerHandle> {
    if orch.backend().is_none() {
        info!("scheduler disabled: backend not configured");
        return None;
    }
    if orch.config().backend.token_is_placeholder() {
        info!("scheduler disabled: BACKEND_TOKEN is not configured");
        return None;
    }

    let heartbeat = tokio::spawn(heartbeat_loop(orch.clone()));
    let poll = tokio::spawn(command_poll_loop(orch.clone()));
    info!(
        heartbeat_interval_secs = orch.config().daemon.heartbeat_interval_secs,
        poll_interval_secs = orch.config().daemon.command_poll_interval_secs,
        "scheduler started"
    );
    Some(SchedulerHandle { heartbeat, poll })
}

/// Sleep that wakes early on shutdown; returns false when shutting down.
async fn sleep_or_shutdown(rx: &mut broadcast::Receiver<()>, duration: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => true,
        _ = rx.recv() => false,
    }
}

// ---------------------------------------------------------------------------
// Heartbeat loop
// ---------------------------------------------------------------------------

async fn heartbeat_loop(orch: Arc<Orchestrator>) {
    let shutdown = orch.shutdown();
    let mut rx = shutdown.subscribe();
    let interval = Duration::from_secs(orch.config().daemon.heartbeat_interval_secs);
    let mut backoff = RateLimitBackoff::new();

    if !sleep_or_shutdown(&mut rx, INITIAL_HEARTBEAT_DELAY).await {
        return;
    }

    while !shutdown.is_shutting_down() {
        let Some(client) = orch.backend() else {
            break;
        };
        let body = orch.heartbeat_body();

        let sleep_for = match client.daemon_heartbeat(&body).await {
            Ok(raw) if raw.status == 200 => {
                backoff.reset();
                orch.metrics()
                    .inc_labeled("arcanos_heartbeats_total", Labels::new(&[("status", "ok")]));
                interval
            }
            Ok(raw) if raw.status == 429 => {
                let delay = backoff
                    .on_rate_limited(interval, raw.retry_after_seconds.map(Duration::from_secs));
                orch.metrics().inc_labeled(
                    "arcanos_heartbeats_total",
                    Labels::new(&[("status", "rate_limited")]),
                );
                warn!(
                    backoff_secs = delay.as_secs(),
                    "heartbeat rate limited (429); backing off"
                );
                delay
            }
            Ok(raw) => {
                backoff.reset();
                orch.metrics()
                    .inc_labeled("arcanos_heartbeats_total", Labels::new(&[("status", "error")]));
                error!(status = raw.status, "heartbeat failed");
                interval
            }
            Err(e) => {
                backoff.reset();
                orch.metrics()
                    .inc_labeled("arcanos_heartbeats_total", Labels::new(&[("status", "error")]));
                error!(error = %e, "heartbeat error");
                interval
            }
        };

        if !sleep_or_shutdown(&mut rx, sleep_for).await {
            break;
        }
    }
    info!("heartbeat loop stopped");
}

// ---------------------------------------------------------------------------
// Command-poll loop
// ---------------------------------------------------------------------------

async fn command_poll_loop(orch: Arc<Orchestrator>) {
    let shutdown = orch.shutdown();
    let mut rx = shutdown.subscribe();
    let interval = Duration::from_secs(orch.config().daemon.command_poll_interval_secs);
    let mut backoff = RateLimitBackoff::new();

    while !shutdown.is_shutting_down() {
        let Some(client) = orch.backend() else {
            break;
        };

        let sleep_for = match client.daemon_commands(orch.instance_id()).await {
            Ok(raw) if raw.status == 200 => {
                backoff.reset();
                orch.process_poll_payload(raw.json()).await;
                interval
            }
            Ok(raw) if raw.status == 401 => {
                warn!("authentication failed, stopping command polling");
                break;
            }
            Ok(raw) if raw.status == 429 => {
                let delay = backoff
                    .on_rate_limited(interval, raw.retry_after_seconds.map(Duration::from_secs));
                warn!(
                    backoff_secs = delay.as_secs(),
                    "command poll rate limited (429); backing off"
                );
                delay
            }
            Ok(raw) => {
                backoff.reset();
                error!(status = raw.status, "command poll failed");
                interval
            }
            Err(e) => {
                backoff.reset();
                error!(error = %e, "command poll request error");
                interval
            }
        };

        if !sleep_or_shutdown(&mut rx, sleep_for).await {
            break;
        }
    }
    info!("command poll loop stopped");
}
