use super::{require_text, ReasoningEngine};
use crate::context::RequestContext;
use crate::error::EngineError;
use crate::gate::{self, GateDecision};
use crate::lock::Operation;
use crate::store::{ChangeSet, OutboxEntry};
use crate::types::{TransitionId, WorkspaceId, WorkspaceReasoning, WorkspaceState};
use casework_audit::{AuditEvent, EntityType, EventId, EventType, Metadata};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

/// Result of a committed state change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionReceipt {
    pub workspace_id: WorkspaceId,
    pub from_state: WorkspaceState,
    pub to_state: WorkspaceState,
    pub transition_id: TransitionId,
    pub auto_approved: bool,
    /// `None` while the audit event is still waiting in the outbox
    pub event_id: Option<EventId>,
    pub at: DateTime<Utc>,
}

impl TransitionReceipt {
    pub(super) fn new(
        transition: &crate::types::Transition,
        events: &[AuditEvent],
    ) -> Self {
        let event_id = events
            .iter()
            .find(|e| {
                e.event_type == EventType::StateTransition
                    && e.metadata.get("transitionId") == Some(&json!(transition.id))
            })
            .map(|e| e.id);
        Self {
            workspace_id: transition.workspace_id,
            from_state: transition.from_state,
            to_state: transition.to_state,
            transition_id: transition.id,
            auto_approved: transition.auto_approved,
            event_id,
            at: transition.created_at,
        }
    }
}

/// Error for a refused gate decision
///
/// `BlockingElementsPresent` only when open blockers are the sole reason;
/// otherwise every violation, blockers included, is reported together.
fn refusal(from: WorkspaceState, to: WorkspaceState, decision: GateDecision) -> EngineError {
    if decision.only_blockers() {
        return EngineError::BlockingElementsPresent {
            from,
            to,
            ids: decision.blocking_ids(),
        };
    }
    EngineError::InvalidStateTransition {
        from,
        to,
        violations: decision.violations,
    }
}

impl ReasoningEngine {
    /// Move a workspace to `to`
    ///
    /// VALIDATED is delegated to [`Self::validate`], with `reason` as the
    /// validation note.
    ///
    /// # Errors
    /// `InvalidStateTransition` or `BlockingElementsPresent` when the gate
    /// refuses (state untouched, nothing appended), `WorkspaceLocked`,
    /// `NotFound`/`Forbidden`, store failures.
    #[tracing::instrument(skip(self, ctx, reason), fields(tenant = %ctx.tenant_id))]
    pub async fn transition(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        to: WorkspaceState,
        reason: &str,
    ) -> Result<TransitionReceipt, EngineError> {
        require_text("reason", reason)?;
        if to == WorkspaceState::Validated {
            return self.validate(ctx, id, Some(reason.to_string())).await;
        }

        let (_guard, snapshot) = self.hold(ctx, id, Operation::Transition).await?;
        let from = snapshot.state();
        let decision = gate::check(to, &snapshot, &self.policy());
        if !decision.allowed {
            tracing::warn!(
                workspace = %id,
                %from,
                %to,
                violations = decision.violations.len(),
                "transition refused"
            );
            return Err(refusal(from, to, decision));
        }

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        let transition = Self::stage_transition(&mut changes, &ctx.actor(), to, reason, false, Metadata::new());
        let events = self.commit(ctx, &snapshot, changes).await?;
        Ok(TransitionReceipt::new(&transition, &events))
    }

    /// Reviewer sign-off: READY_FOR_HUMAN → VALIDATED, then lock
    ///
    /// # Errors
    /// `Forbidden` unless the caller may review, gate refusals,
    /// `WorkspaceLocked`, store failures.
    #[tracing::instrument(skip(self, ctx, note), fields(tenant = %ctx.tenant_id))]
    pub async fn validate(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        note: Option<String>,
    ) -> Result<TransitionReceipt, EngineError> {
        if !ctx.role.can_review() {
            return Err(EngineError::Forbidden("only reviewers may validate".into()));
        }
        let (_guard, snapshot) = self.hold(ctx, id, Operation::Validate).await?;
        let from = snapshot.state();
        let to = WorkspaceState::Validated;
        let decision = gate::check(to, &snapshot, &self.policy());
        if !decision.allowed {
            tracing::warn!(workspace = %id, %from, "validation refused");
            return Err(refusal(from, to, decision));
        }

        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let mut extra = Metadata::new();
        extra.insert("locked".into(), json!(true));
        if let Some(note) = &note {
            extra.insert("validationNote".into(), json!(note));
        }

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        let transition = Self::stage_transition(
            &mut changes,
            &ctx.actor(),
            to,
            note.as_deref().unwrap_or("validated"),
            false,
            extra,
        );
        let workspace = &mut changes.workspace;
        workspace.locked = true;
        workspace.validated_by = Some(ctx.user_id.clone());
        workspace.validated_at = Some(transition.created_at);
        workspace.validation_note = note;

        let events = self.commit(ctx, &snapshot, changes).await?;
        tracing::info!(workspace = %id, validated_by = %ctx.user_id, "workspace validated");
        Ok(TransitionReceipt::new(&transition, &events))
    }

    /// Lift the validation lock; only the validating user may do this
    ///
    /// # Errors
    /// `Forbidden` for anyone but the validator, `InvalidInput` when the
    /// workspace is not locked, `WorkspaceLocked`, store failures.
    #[tracing::instrument(skip(self, ctx, reason), fields(tenant = %ctx.tenant_id))]
    pub async fn unlock(&self, ctx: &RequestContext, id: WorkspaceId, reason: &str) -> Result<WorkspaceReasoning, EngineError> {
        require_text("reason", reason)?;
        let (_guard, snapshot) = self.hold(ctx, id, Operation::Unlock).await?;
        let workspace = &snapshot.workspace;
        if !workspace.locked {
            return Err(EngineError::InvalidInput(format!("workspace {id} is not locked")));
        }
        if workspace.validated_by.as_deref() != Some(ctx.user_id.as_str()) {
            tracing::warn!(workspace = %id, user = %ctx.user_id, "unlock refused");
            return Err(EngineError::Forbidden("only the validating user may unlock".into()));
        }

        let mut changes = ChangeSet::for_workspace(workspace);
        changes.workspace.locked = false;
        let mut metadata = Metadata::new();
        metadata.insert("reason".into(), json!(reason));
        metadata.insert("state".into(), json!(workspace.current_state));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::WorkspaceUnlocked,
            EntityType::Workspace,
            id,
            ctx.actor(),
            metadata,
        ));
        let unlocked = changes.workspace.clone();
        self.commit(ctx, &snapshot, changes).await?;
        tracing::info!(workspace = %id, "workspace unlocked");
        Ok(unlocked)
    }

    /// Retire a CLOSED workspace and everything it owns
    ///
    /// The audit chain is untouched; the workspace stays readable.
    ///
    /// # Errors
    /// `Forbidden` unless the caller may review, `InvalidInput` when the
    /// workspace is not CLOSED or already archived, `WorkspaceLocked`,
    /// store failures.
    #[tracing::instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id))]
    pub async fn archive(&self, ctx: &RequestContext, id: WorkspaceId) -> Result<WorkspaceReasoning, EngineError> {
        if !ctx.role.can_review() {
            return Err(EngineError::Forbidden("only reviewers may archive".into()));
        }
        let (_guard, snapshot) = self.hold(ctx, id, Operation::Archive).await?;
        let workspace = &snapshot.workspace;
        if workspace.is_archived() {
            return Err(EngineError::InvalidInput(format!("workspace {id} is already archived")));
        }
        if workspace.current_state != WorkspaceState::Closed {
            return Err(EngineError::InvalidInput(format!(
                "only CLOSED workspaces can be archived; {id} is {}",
                workspace.current_state
            )));
        }

        let mut changes = ChangeSet::for_workspace(workspace);
        changes.workspace.archived_at = Some(Utc::now());
        let mut metadata = Metadata::new();
        metadata.insert("facts".into(), json!(snapshot.facts.len()));
        metadata.insert("contexts".into(), json!(snapshot.contexts.len()));
        metadata.insert("obligations".into(), json!(snapshot.obligations.len()));
        metadata.insert("missingElements".into(), json!(snapshot.missing_elements.len()));
        metadata.insert("risks".into(), json!(snapshot.risks.len()));
        metadata.insert("actions".into(), json!(snapshot.actions.len()));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::WorkspaceArchived,
            EntityType::Workspace,
            id,
            ctx.actor(),
            metadata,
        ));
        let archived = changes.workspace.clone();
        self.commit(ctx, &snapshot, changes).await?;
        tracing::info!(workspace = %id, "workspace archived");
        Ok(archived)
    }
}
