use crate::error::IllegalTransition;
use rollout_core::HostUpgradeState;

/// Validates a host state transition.
///
/// Forward moves go one step at a time; `Failed` is reachable from every
/// non-terminal state; terminal states have no exits.
pub fn validate_transition(
    from: HostUpgradeState,
    to: HostUpgradeState,
) -> Result<(), IllegalTransition> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

#[must_use]
pub fn allowed_transitions(from: HostUpgradeState) -> Vec<HostUpgradeState> {
    use HostUpgradeState::*;
    match from {
        Pending => vec![BackingUp, Failed],
        BackingUp => vec![Preparing, Failed],
        Preparing => vec![Upgrading, Failed],
        Upgrading => vec![Rebooting, Failed],
        Rebooting => vec![Verifying, Failed],
        Verifying => vec![Succeeded, Failed],
        Succeeded => vec![],
        Failed => vec![],
    }
}

fn allowed(from: HostUpgradeState, to: HostUpgradeState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_legal() {
        for pair in HostUpgradeState::FORWARD.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
    }

    #[test]
    fn failed_reachable_from_every_non_terminal_state() {
        for state in HostUpgradeState::FORWARD {
            let result = validate_transition(state, HostUpgradeState::Failed);
            assert_eq!(result.is_ok(), !state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn no_skipping_or_going_back() {
        assert!(validate_transition(HostUpgradeState::Pending, HostUpgradeState::Upgrading).is_err());
        assert!(validate_transition(HostUpgradeState::Verifying, HostUpgradeState::Rebooting).is_err());
        assert!(validate_transition(HostUpgradeState::Failed, HostUpgradeState::Pending).is_err());
    }
}
