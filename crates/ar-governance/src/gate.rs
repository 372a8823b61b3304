use crate::trust::TrustState;

/// Governance policy blocked an action. Denials are final for the call
/// site; they must never be retried without a fresh trust computation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("action `{action}` requires FULL trust; current={current}")]
pub struct GovernanceError {
    pub action: String,
    pub current: &'static str,
}

/// Enforce the trust-level policy before an action executes.
///
/// Confirmation-gated actions require `Full` trust; everything else is
/// allowed in any trust state.
pub fn assert_allowed(
    action_name: &str,
    trust_state: TrustState,
    requires_confirmation: bool,
) -> Result<(), GovernanceError> {
    if requires_confirmation && trust_state != TrustState::Full {
        return Err(GovernanceError {
            action: action_name.to_string(),
            current: trust_state.as_str(),
        });
    }
    Ok(())
}
