use super::{
    ContextHypothesis, Fact, MissingElement, Obligation, ProposedAction, ReasoningTrace, Risk,
    SourceType, Transition, WorkspaceId, WorkspaceState,
};
use casework_audit::{ChainHash, Metadata, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root record of one inbound case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceReasoning {
    pub id: WorkspaceId,
    pub tenant_id: TenantId,
    pub current_state: WorkspaceState,
    pub state_changed_at: DateTime<Utc>,
    pub state_changed_by: String,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub source_raw: String,
    pub source_metadata: Metadata,
    /// Fingerprint of the normalised source text
    pub content_hash: ChainHash,
    pub sender_email: Option<String>,
    pub received_at: DateTime<Utc>,
    pub procedure_type: Option<String>,
    pub reasoning_quality: f64,
    pub uncertainty_level: f64,
    pub confidence_score: f64,
    pub locked: bool,
    pub validated_by: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validation_note: Option<String>,
    pub duplicate_of: Option<WorkspaceId>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every committed change
    pub version: u64,
}

impl WorkspaceReasoning {
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// A workspace together with everything it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub workspace: WorkspaceReasoning,
    pub facts: Vec<Fact>,
    pub contexts: Vec<ContextHypothesis>,
    pub obligations: Vec<Obligation>,
    pub missing_elements: Vec<MissingElement>,
    pub risks: Vec<Risk>,
    pub actions: Vec<ProposedAction>,
    pub traces: Vec<ReasoningTrace>,
    pub transitions: Vec<Transition>,
}

impl WorkspaceSnapshot {
    #[must_use]
    pub fn new(workspace: WorkspaceReasoning) -> Self {
        Self {
            workspace,
            facts: Vec::new(),
            contexts: Vec::new(),
            obligations: Vec::new(),
            missing_elements: Vec::new(),
            risks: Vec::new(),
            actions: Vec::new(),
            traces: Vec::new(),
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> WorkspaceId {
        self.workspace.id
    }

    #[must_use]
    pub fn state(&self) -> WorkspaceState {
        self.workspace.current_state
    }

    /// Blocking missing elements that are still unresolved
    pub fn open_blockers(&self) -> impl Iterator<Item = &MissingElement> {
        self.missing_elements.iter().filter(|m| m.is_open_blocker())
    }
}
