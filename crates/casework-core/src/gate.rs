//! Validation gate
//!
//! [`check`] is pure: it reads a snapshot and a policy and reports every
//! reason the requested transition may not happen. It never touches storage.

use crate::state_machine;
use crate::types::{MissingElementId, WorkspaceSnapshot, WorkspaceState};
use casework_audit::EntityType;
use serde::Serialize;
use std::fmt;

/// Policy knobs the gate reads from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatePolicy {
    pub require_full_analysis: bool,
}

/// The record a violation is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl ToString) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationReason {
    IllegalTransition { from: WorkspaceState, to: WorkspaceState },
    WorkspaceLocked,
    WorkspaceArchived,
    NoFacts,
    NoContext,
    NoObligations,
    NoRisks,
    NoProposedActions,
    UnresolvedBlockingElement,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalTransition { from, to } => write!(f, "{from} cannot move to {to}"),
            Self::WorkspaceLocked => f.write_str("workspace is validated and locked"),
            Self::WorkspaceArchived => f.write_str("workspace is archived"),
            Self::NoFacts => f.write_str("no facts recorded"),
            Self::NoContext => f.write_str("no context hypothesis recorded"),
            Self::NoObligations => f.write_str("no obligations deduced"),
            Self::NoRisks => f.write_str("no risks evaluated"),
            Self::NoProposedActions => f.write_str("no actions proposed"),
            Self::UnresolvedBlockingElement => f.write_str("blocking missing element is unresolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub entity: EntityRef,
    #[serde(flatten)]
    pub reason: ViolationReason,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.entity.entity_type, self.entity.entity_id, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub violations: Vec<Violation>,
}

impl GateDecision {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            allowed: violations.is_empty(),
            violations,
        }
    }

    /// Ids of the unresolved blocking elements that stopped the transition
    #[must_use]
    pub fn blocking_ids(&self) -> Vec<MissingElementId> {
        self.violations
            .iter()
            .filter(|v| v.reason == ViolationReason::UnresolvedBlockingElement)
            .filter_map(|v| v.entity.entity_id.parse().ok())
            .collect()
    }

    /// Refused for open blockers and nothing else
    #[must_use]
    pub fn only_blockers(&self) -> bool {
        !self.violations.is_empty()
            && self
                .violations
                .iter()
                .all(|v| v.reason == ViolationReason::UnresolvedBlockingElement)
    }

    #[must_use]
    pub fn is_illegal_transition(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v.reason, ViolationReason::IllegalTransition { .. }))
    }
}

/// Everything that prevents `snapshot` from moving to `target`
#[must_use]
pub fn check(target: WorkspaceState, snapshot: &WorkspaceSnapshot, policy: &GatePolicy) -> GateDecision {
    let workspace = &snapshot.workspace;
    let here = EntityRef::new(EntityType::Workspace, workspace.id);
    let mut violations = Vec::new();
    let mut require = |ok: bool, reason: ViolationReason| {
        if !ok {
            violations.push(Violation {
                entity: here.clone(),
                reason,
            });
        }
    };

    require(
        state_machine::validate_transition(workspace.current_state, target).is_ok(),
        ViolationReason::IllegalTransition {
            from: workspace.current_state,
            to: target,
        },
    );
    require(!workspace.locked, ViolationReason::WorkspaceLocked);
    require(!workspace.is_archived(), ViolationReason::WorkspaceArchived);

    let has_facts = !snapshot.facts.is_empty();
    let has_context = !snapshot.contexts.is_empty();
    let has_obligations = !snapshot.obligations.is_empty();
    let has_risks = !snapshot.risks.is_empty();

    match target {
        WorkspaceState::FactsExtracted => require(has_facts, ViolationReason::NoFacts),
        WorkspaceState::ContextIdentified => require(has_context, ViolationReason::NoContext),
        WorkspaceState::ObligationsDeduced => require(has_obligations, ViolationReason::NoObligations),
        WorkspaceState::RiskEvaluated => require(has_risks, ViolationReason::NoRisks),
        WorkspaceState::ActionProposed => {
            require(!snapshot.actions.is_empty(), ViolationReason::NoProposedActions);
        }
        WorkspaceState::ReadyForHuman => {
            require(has_facts, ViolationReason::NoFacts);
            if policy.require_full_analysis {
                require(has_context, ViolationReason::NoContext);
                require(has_obligations, ViolationReason::NoObligations);
                require(has_risks, ViolationReason::NoRisks);
            }
        }
        WorkspaceState::Received
        | WorkspaceState::MissingIdentified
        | WorkspaceState::Validated
        | WorkspaceState::Closed => {}
    }

    if matches!(target, WorkspaceState::ReadyForHuman | WorkspaceState::Validated) {
        violations.extend(snapshot.open_blockers().map(|element| Violation {
            entity: EntityRef::new(EntityType::MissingElement, element.id),
            reason: ViolationReason::UnresolvedBlockingElement,
        }));
    }

    GateDecision::from_violations(violations)
}
