//! Governance core: the trust/registry state machine, the confirmation
//! policy gate, the idempotency guard, and the execution pipeline that
//! wraps every privileged, side-effecting action.

pub mod gate;
pub mod idempotency;
pub mod pipeline;
pub mod trust;

pub use gate::{assert_allowed, GovernanceError};
pub use idempotency::{fingerprint, IdempotencyGuard};
pub use pipeline::{execute, ExecutionError};
pub use trust::{TrustRegistry, TrustState};
