use std::time::Duration;

/// Hard ceiling on any computed backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(120);
/// Exponent cap: at most `2^4 = 16x` the base interval.
const MAX_EXPONENT: u32 = 4;

/// Bounded exponential backoff keyed on consecutive 429 responses.
///
/// Both scheduler loops share this discipline: each rate-limited response
/// increments the counter and sleeps
/// `min(120s, interval * 2^min(counter, 4))`, overridden upward by a
/// server-provided `Retry-After`. Any non-429 outcome resets the counter.
#[derive(Debug, Default)]
pub struct RateLimitBackoff {
    consecutive: u32,
}

impl RateLimitBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a 429 and return how long to sleep before the next attempt.
    pub fn on_rate_limited(
        &mut self,
        base_interval: Duration,
        retry_after: Option<Duration>,
    ) -> Duration {
        self.consecutive = self.consecutive.saturating_add(1);
        let factor = 2u32.saturating_pow(self.consecutive.min(MAX_EXPONENT));
        let mut backoff = base_interval
            .saturating_mul(factor)
            .min(MAX_BACKOFF);
        if let Some(retry_after) = retry_after {
            backoff = backoff.max(retry_after);
        }
        backoff
    }

    /// Any non-429 outcome (success, other error, network failure).
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Parse a `Retry-After` header value given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
