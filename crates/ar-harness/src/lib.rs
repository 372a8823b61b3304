//! Shared runtime plumbing: cooperative shutdown, token-bucket rate
//! limiting, the bounded 429 backoff discipline used by the scheduler
//! loops, and credential redaction for structured events.

pub mod backoff;
pub mod rate_limiter;
pub mod redact;
pub mod shutdown;

pub use backoff::RateLimitBackoff;
pub use rate_limiter::{RateLimitConfig, RateLimitError, RateLimiter};
pub use redact::redact_value;
pub use shutdown::ShutdownSignal;
