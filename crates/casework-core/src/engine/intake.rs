use super::{ensure_writable, require_text, ReasoningEngine};
use crate::context::RequestContext;
use crate::duplicate::{ContentHasher, DuplicateCandidate, DuplicateQuery, MatchReason};
use crate::error::EngineError;
use crate::lock::Operation;
use crate::store::{ChangeSet, OutboxEntry};
use crate::types::{SourceType, WorkspaceId, WorkspaceReasoning, WorkspaceState};
use casework_audit::{
    validate_metadata, Actor, AuditEvent, EntityType, EventType, Metadata, TenantId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// A message as it arrives from a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub source_type: SourceType,
    #[serde(default)]
    pub source_id: Option<String>,
    pub source_raw: String,
    #[serde(default)]
    pub source_metadata: Metadata,
    #[serde(default)]
    pub sender_email: Option<String>,
    /// Defaults to the intake time
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl InboundMessage {
    pub fn new(source_type: SourceType, source_raw: impl Into<String>) -> Self {
        Self {
            source_type,
            source_id: None,
            source_raw: source_raw.into(),
            source_metadata: Metadata::new(),
            sender_email: None,
            received_at: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender_email: impl Into<String>) -> Self {
        self.sender_email = Some(sender_email.into());
        self
    }

    #[must_use]
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.source_metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeOutcome {
    pub workspace: WorkspaceReasoning,
    pub duplicates: Vec<DuplicateCandidate>,
    pub events: Vec<AuditEvent>,
}

fn proposal(
    tenant_id: &TenantId,
    workspace_id: WorkspaceId,
    candidate_id: WorkspaceId,
    reason: Option<&DuplicateCandidate>,
    actor: Actor,
) -> OutboxEntry {
    let mut metadata = Metadata::new();
    metadata.insert("candidateWorkspaceId".into(), json!(candidate_id));
    metadata.insert(
        "matchReason".into(),
        reason.map_or(json!("manual"), |c| json!(c.reason)),
    );
    if let Some(candidate) = reason {
        metadata.insert("score".into(), json!(candidate.score));
        if let Some(diff) = candidate.time_diff_seconds {
            metadata.insert("timeDiffSeconds".into(), json!(diff));
        }
    }
    metadata.insert("status".into(), json!("PROPOSED_FOR_LINKING"));
    metadata.insert("actionRequired".into(), json!(true));
    OutboxEntry::new(
        tenant_id.clone(),
        EventType::DuplicateDetected,
        EntityType::Workspace,
        workspace_id,
        actor,
        metadata,
    )
}

impl ReasoningEngine {
    /// Create a RECEIVED workspace from an inbound message
    ///
    /// Exact-content matches already in the tenant are proposed as
    /// duplicates; nothing is linked.
    ///
    /// # Errors
    /// `Forbidden` for read-only roles, `InvalidInput` for an empty body or
    /// bad metadata, store failures.
    #[tracing::instrument(skip(self, ctx, message), fields(tenant = %ctx.tenant_id))]
    pub async fn receive(&self, ctx: &RequestContext, message: InboundMessage) -> Result<IntakeOutcome, EngineError> {
        if !ctx.role.can_mutate() {
            return Err(EngineError::Forbidden(format!("role {} is read-only", ctx.role)));
        }
        require_text("sourceRaw", &message.source_raw)?;
        validate_metadata(&message.source_metadata)?;

        let now = Utc::now();
        let received_at = message.received_at.unwrap_or(now);
        let content_hash = ContentHasher::fingerprint(&message.source_raw);
        let sender_email = message
            .sender_email
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let duplicates = self
            .duplicates
            .find_candidates(
                &ctx.tenant_id,
                &DuplicateQuery {
                    content_hash,
                    sender_email: sender_email.clone(),
                    received_at: Some(received_at),
                    exclude: None,
                },
            )
            .await?;

        let workspace = WorkspaceReasoning {
            id: WorkspaceId::new(),
            tenant_id: ctx.tenant_id.clone(),
            current_state: WorkspaceState::Received,
            state_changed_at: now,
            state_changed_by: ctx.user_id.clone(),
            source_type: message.source_type,
            source_id: message.source_id,
            source_raw: message.source_raw,
            source_metadata: message.source_metadata,
            content_hash,
            sender_email,
            received_at,
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
        };

        let mut created = Metadata::new();
        created.insert("sourceType".into(), json!(workspace.source_type));
        created.insert("contentHash".into(), json!(content_hash.to_string()));
        created.insert("receivedAt".into(), json!(received_at));
        if let Some(sender) = &workspace.sender_email {
            created.insert("senderEmail".into(), json!(sender));
        }
        let mut outbox = vec![OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::WorkspaceCreated,
            EntityType::Workspace,
            workspace.id,
            ctx.actor(),
            created,
        )];

        if self.config.propose_duplicates_on_intake {
            outbox.extend(
                duplicates
                    .iter()
                    .filter(|c| c.reason == MatchReason::ExactHashMatch)
                    .map(|c| proposal(&ctx.tenant_id, workspace.id, c.workspace_id, Some(c), Actor::system())),
            );
        }

        let current: Vec<Uuid> = outbox.iter().map(|e| e.id).collect();
        self.store.insert(workspace.clone(), outbox).await?;
        let events = self.flush(&ctx.tenant_id, &current).await;

        tracing::info!(
            workspace = %workspace.id,
            source_type = ?workspace.source_type,
            duplicates = duplicates.len(),
            "workspace received"
        );
        Ok(IntakeOutcome {
            workspace,
            duplicates,
            events,
        })
    }

    /// Ranked duplicate candidates for an existing workspace
    ///
    /// # Errors
    /// `NotFound`/`Forbidden` for foreign workspaces, store failures.
    pub async fn find_duplicates(&self, ctx: &RequestContext, id: WorkspaceId) -> Result<Vec<DuplicateCandidate>, EngineError> {
        let snapshot = self.load(ctx, id).await?;
        let workspace = &snapshot.workspace;
        Ok(self
            .duplicates
            .find_candidates(
                &ctx.tenant_id,
                &DuplicateQuery {
                    content_hash: workspace.content_hash,
                    sender_email: workspace.sender_email.clone(),
                    received_at: Some(workspace.received_at),
                    exclude: Some(id),
                },
            )
            .await?)
    }

    /// Record that `id` may duplicate `candidate`, for a reviewer to decide
    ///
    /// # Errors
    /// `InvalidInput` when both ids are equal, `NotFound`/`Forbidden` when
    /// either workspace is outside the caller's tenant, audit failures.
    pub async fn propose_link(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        candidate: WorkspaceId,
    ) -> Result<AuditEvent, EngineError> {
        if id == candidate {
            return Err(EngineError::InvalidInput("a workspace cannot duplicate itself".into()));
        }
        if !ctx.role.can_mutate() {
            return Err(EngineError::Forbidden(format!("role {} is read-only", ctx.role)));
        }
        self.authorize(ctx, candidate).await?;
        let ranked = self.find_duplicates(ctx, id).await?;
        let matched = ranked.iter().find(|c| c.workspace_id == candidate);

        let entry = proposal(&ctx.tenant_id, id, candidate, matched, ctx.actor());
        self.flush(&ctx.tenant_id, &[]).await;
        let event = self.audit.append(entry.to_request()).await?;
        tracing::info!(workspace = %id, candidate = %candidate, "duplicate link proposed");
        Ok(event)
    }

    /// Reviewer confirmation: mark `id` as a duplicate of `original`
    ///
    /// Links always point at the root of an existing duplicate chain.
    ///
    /// # Errors
    /// `Forbidden` unless the caller is a reviewer, `InvalidInput` for
    /// self-links or an already linked workspace, `Immutable`,
    /// `WorkspaceLocked`, store failures.
    #[tracing::instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id))]
    pub async fn confirm_link(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        original: WorkspaceId,
    ) -> Result<WorkspaceReasoning, EngineError> {
        if !ctx.role.can_review() {
            return Err(EngineError::Forbidden("only reviewers may link duplicates".into()));
        }
        if id == original {
            return Err(EngineError::InvalidInput("a workspace cannot duplicate itself".into()));
        }
        let root = self.load(ctx, original).await?.workspace;
        let root_id = root.duplicate_of.unwrap_or(root.id);
        if root_id == id {
            return Err(EngineError::InvalidInput("link would create a cycle".into()));
        }

        let (_guard, snapshot) = self.hold(ctx, id, Operation::LinkDuplicate).await?;
        ensure_writable(&snapshot)?;
        if let Some(existing) = snapshot.workspace.duplicate_of {
            return Err(EngineError::InvalidInput(format!("workspace {id} is already linked to {existing}")));
        }

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        changes.workspace.duplicate_of = Some(root_id);
        let mut metadata = Metadata::new();
        metadata.insert("duplicateOf".into(), json!(root_id));
        metadata.insert("requestedOriginal".into(), json!(original));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::DuplicateLinked,
            EntityType::Workspace,
            id,
            ctx.actor(),
            metadata,
        ));
        let workspace = changes.workspace.clone();
        self.commit(ctx, &snapshot, changes).await?;

        tracing::info!(workspace = %id, duplicate_of = %root_id, "duplicate link confirmed");
        Ok(workspace)
    }
}
