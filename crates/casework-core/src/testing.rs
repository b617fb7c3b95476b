//! Snapshot builders shared by unit tests

use crate::types::*;
use casework_audit::{ChainHash, Metadata, TenantId};
use chrono::Utc;

pub(crate) fn workspace(tenant: &str, state: WorkspaceState) -> WorkspaceReasoning {
    let now = Utc::now();
    WorkspaceReasoning {
        id: WorkspaceId::new(),
        tenant_id: TenantId::new(tenant),
        current_state: state,
        state_changed_at: now,
        state_changed_by: "system".into(),
        source_type: SourceType::Email,
        source_id: None,
        source_raw: "text".into(),
        source_metadata: Metadata::new(),
        content_hash: ChainHash::compute(b"text"),
        sender_email: None,
        received_at: now,
        procedure_type: None,
        reasoning_quality: 0.0,
        uncertainty_level: 1.0,
        confidence_score: 0.0,
        locked: false,
        validated_by: None,
        validated_at: None,
        validation_note: None,
        duplicate_of: None,
        archived_at: None,
        created_at: now,
        version: 1,
    }
}

pub(crate) fn snapshot(state: WorkspaceState) -> WorkspaceSnapshot {
    WorkspaceSnapshot::new(workspace("t", state))
}

pub(crate) fn fact(workspace_id: WorkspaceId, confidence: f64) -> Fact {
    Fact {
        id: FactId::new(),
        workspace_id,
        label: "notification_date".into(),
        value: "2026-03-02".into(),
        source: FactSource::Ai,
        source_ref: None,
        confidence,
        extracted_by: "model".into(),
        created_at: Utc::now(),
    }
}

pub(crate) fn context(workspace_id: WorkspaceId, certainty_level: f64) -> ContextHypothesis {
    ContextHypothesis {
        id: ContextId::new(),
        workspace_id,
        context_type: "OQTF".into(),
        description: "removal order".into(),
        reasoning: "prefecture letterhead".into(),
        certainty_level,
        identified_by: "model".into(),
        created_at: Utc::now(),
    }
}

pub(crate) fn missing(workspace_id: WorkspaceId, blocking: bool, resolved: bool) -> MissingElement {
    MissingElement {
        id: MissingElementId::new(),
        workspace_id,
        kind: MissingElementKind::Document,
        description: "signed decision".into(),
        why: "deadline computation".into(),
        blocking,
        resolved,
        resolution: None,
        resolved_by: None,
        resolved_at: None,
        identified_by: "u".into(),
        created_at: Utc::now(),
    }
}
