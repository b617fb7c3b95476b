use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle position of a workspace
///
/// The set is closed: every state a workspace can hold is listed here and
/// the transition table in [`crate::state_machine`] matches on all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceState {
    Received,
    FactsExtracted,
    ContextIdentified,
    ObligationsDeduced,
    MissingIdentified,
    RiskEvaluated,
    ActionProposed,
    ReadyForHuman,
    Validated,
    Closed,
}

impl WorkspaceState {
    pub const ALL: [Self; 10] = [
        Self::Received,
        Self::FactsExtracted,
        Self::ContextIdentified,
        Self::ObligationsDeduced,
        Self::MissingIdentified,
        Self::RiskEvaluated,
        Self::ActionProposed,
        Self::ReadyForHuman,
        Self::Validated,
        Self::Closed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::FactsExtracted => "FACTS_EXTRACTED",
            Self::ContextIdentified => "CONTEXT_IDENTIFIED",
            Self::ObligationsDeduced => "OBLIGATIONS_DEDUCED",
            Self::MissingIdentified => "MISSING_IDENTIFIED",
            Self::RiskEvaluated => "RISK_EVALUATED",
            Self::ActionProposed => "ACTION_PROPOSED",
            Self::ReadyForHuman => "READY_FOR_HUMAN",
            Self::Validated => "VALIDATED",
            Self::Closed => "CLOSED",
        }
    }

    /// Position in the lifecycle, used to tell forward moves from backward ones
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Received => 0,
            Self::FactsExtracted => 1,
            Self::ContextIdentified => 2,
            Self::ObligationsDeduced => 3,
            Self::MissingIdentified => 4,
            Self::RiskEvaluated => 5,
            Self::ActionProposed => 6,
            Self::ReadyForHuman => 7,
            Self::Validated => 8,
            Self::Closed => 9,
        }
    }

    /// VALIDATED and CLOSED
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Closed)
    }
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised state name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown workspace state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for WorkspaceState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Channel a message arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Email,
    Letter,
    Upload,
    Phone,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactSource {
    Ai,
    Human,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingElementKind {
    Information,
    Document,
    Decision,
    Validation,
    HumanExpertise,
}

/// Probability or impact bucket of a risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip() {
        for state in WorkspaceState::ALL {
            assert_eq!(state.as_str().parse::<WorkspaceState>().unwrap(), state);
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::json!(state.as_str()));
        }
        assert_eq!("ready_for_human".parse::<WorkspaceState>().unwrap(), WorkspaceState::ReadyForHuman);
        assert!("ARCHIVED".parse::<WorkspaceState>().is_err());
    }

    #[test]
    fn ranks_follow_declaration_order() {
        let ranks: Vec<u8> = WorkspaceState::ALL.iter().map(|s| s.rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
    }
}
