//! Child records owned by a workspace

use super::{
    ActionId, ContextId, FactId, FactSource, MissingElementId, MissingElementKind, ObligationId,
    RiskId, RiskLevel, TraceId, TransitionId, WorkspaceId, WorkspaceState,
};
use casework_audit::Metadata;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub id: FactId,
    pub workspace_id: WorkspaceId,
    pub label: String,
    pub value: String,
    pub source: FactSource,
    pub source_ref: Option<String>,
    pub confidence: f64,
    pub extracted_by: String,
    pub created_at: DateTime<Utc>,
}

/// A candidate reading of what procedure the case belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextHypothesis {
    pub id: ContextId,
    pub workspace_id: WorkspaceId,
    #[serde(rename = "type")]
    pub context_type: String,
    pub description: String,
    pub reasoning: String,
    pub certainty_level: f64,
    pub identified_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub id: ObligationId,
    pub workspace_id: WorkspaceId,
    pub context_id: ContextId,
    pub description: String,
    pub mandatory: bool,
    pub deadline: Option<NaiveDate>,
    pub critical: bool,
    pub legal_ref: Option<String>,
    pub deduced_by: String,
    pub created_at: DateTime<Utc>,
}

/// Something the case cannot progress without
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingElement {
    pub id: MissingElementId,
    pub workspace_id: WorkspaceId,
    #[serde(rename = "type")]
    pub kind: MissingElementKind,
    pub description: String,
    pub why: String,
    pub blocking: bool,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub identified_by: String,
    pub created_at: DateTime<Utc>,
}

impl MissingElement {
    /// Blocking and not yet resolved
    #[must_use]
    pub fn is_open_blocker(&self) -> bool {
        self.blocking && !self.resolved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub id: RiskId,
    pub workspace_id: WorkspaceId,
    pub description: String,
    pub probability: RiskLevel,
    pub impact: RiskLevel,
    /// Product of the two weights, always within 1..=9
    pub risk_score: u8,
    pub irreversible: bool,
    pub evaluated_by: String,
    pub created_at: DateTime<Utc>,
}

impl Risk {
    #[must_use]
    pub fn score(probability: RiskLevel, impact: RiskLevel) -> u8 {
        probability.weight() * impact.weight()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAction {
    pub id: ActionId,
    pub workspace_id: WorkspaceId,
    pub action_type: String,
    pub description: String,
    pub rationale: String,
    pub proposed_by: String,
    pub created_at: DateTime<Utc>,
}

/// Record of one AI reasoning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningTrace {
    pub id: TraceId,
    pub workspace_id: WorkspaceId,
    pub step: String,
    pub model: String,
    pub processing_time_ms: u64,
    pub confidence: f64,
    pub summary: String,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: TransitionId,
    pub workspace_id: WorkspaceId,
    pub from_state: WorkspaceState,
    pub to_state: WorkspaceState,
    pub triggered_by: String,
    pub reason: String,
    pub auto_approved: bool,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_score_stays_in_range() {
        let levels = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];
        for p in levels {
            for i in levels {
                let score = Risk::score(p, i);
                assert!((1..=9).contains(&score));
            }
        }
        assert_eq!(Risk::score(RiskLevel::High, RiskLevel::Medium), 6);
    }
}
