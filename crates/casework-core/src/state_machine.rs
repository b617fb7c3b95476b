//! Workspace lifecycle transitions
//!
//! Legality only; the evidence a target state needs is checked by
//! [`crate::gate`].

use crate::types::WorkspaceState;

/// Transition not present in the lifecycle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: WorkspaceState,
    pub to: WorkspaceState,
}

/// Validates a state transition.
///
/// # Errors
/// [`IllegalTransition`] when `to` is not reachable from `from` in one step.
pub fn validate_transition(from: WorkspaceState, to: WorkspaceState) -> Result<(), IllegalTransition> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// Every state reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: WorkspaceState) -> &'static [WorkspaceState] {
    use WorkspaceState::*;
    match from {
        Received => &[FactsExtracted, ContextIdentified, Closed],
        FactsExtracted => &[
            ContextIdentified,
            ObligationsDeduced,
            MissingIdentified,
            RiskEvaluated,
            ActionProposed,
            ReadyForHuman,
            Closed,
        ],
        ContextIdentified => &[
            ObligationsDeduced,
            MissingIdentified,
            RiskEvaluated,
            ActionProposed,
            ReadyForHuman,
            Closed,
        ],
        ObligationsDeduced => &[MissingIdentified, RiskEvaluated, ActionProposed, ReadyForHuman, Closed],
        MissingIdentified => &[RiskEvaluated, ActionProposed, ReadyForHuman, Closed],
        RiskEvaluated => &[ActionProposed, ReadyForHuman, Closed],
        ActionProposed => &[ReadyForHuman, Closed],
        // A reviewer may send a case back for more information.
        ReadyForHuman => &[Validated, MissingIdentified, Closed],
        Validated => &[Closed],
        Closed => &[],
    }
}

fn allowed(from: WorkspaceState, to: WorkspaceState) -> bool {
    allowed_transitions(from).contains(&to)
}
