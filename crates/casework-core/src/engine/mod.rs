//! Reasoning engine
//!
//! Every operation follows the same sequence: check the caller's tenant
//! owns the workspace, take the workspace guard, load a fresh snapshot,
//! decide, then commit one [`ChangeSet`] whose audit intents are delivered
//! to the chain right after the commit.

mod extract;
mod intake;
mod lifecycle;
mod queries;
mod records;

pub use extract::{ExtractOptions, ExtractionOutcome};
pub use intake::{InboundMessage, IntakeOutcome};
pub use lifecycle::TransitionReceipt;
pub use queries::TrailFilter;
pub use records::{NewAction, NewFact, NewMissingElement, NewRisk};

use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::duplicate::DuplicateDetector;
use crate::error::EngineError;
use crate::extraction::ExtractionGateway;
use crate::gate::GatePolicy;
use crate::lock::{Operation, WorkspaceGuard, WorkspaceLocks};
use crate::scoring;
use crate::store::{ChangeSet, MemoryWorkspaceStore, OutboxEntry, WorkspaceStore};
use crate::types::{Transition, TransitionId, WorkspaceId, WorkspaceSnapshot, WorkspaceState};
use casework_audit::{
    Actor, AuditEvent, AuditLog, EntityType, EventType, MemoryEventStore, Metadata, TenantId,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Counts from one outbox recovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub delivered: usize,
    pub remaining: usize,
}

/// Orchestrates workspaces, extraction and the audit chain
#[derive(Clone)]
pub struct ReasoningEngine {
    config: EngineConfig,
    store: Arc<dyn WorkspaceStore>,
    audit: AuditLog,
    gateway: Arc<dyn ExtractionGateway>,
    locks: WorkspaceLocks,
    duplicates: DuplicateDetector,
}

impl std::fmt::Debug for ReasoningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningEngine")
            .field("config", &self.config)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl ReasoningEngine {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn WorkspaceStore>,
        audit: AuditLog,
        gateway: Arc<dyn ExtractionGateway>,
    ) -> Self {
        let duplicates = DuplicateDetector::new(Arc::clone(&store), config.duplicate_window_secs);
        Self {
            config,
            store,
            audit,
            gateway,
            locks: WorkspaceLocks::new(),
            duplicates,
        }
    }

    /// Engine over the in-memory stores
    #[must_use]
    pub fn in_memory(config: EngineConfig, gateway: Arc<dyn ExtractionGateway>) -> Self {
        let audit = AuditLog::new(Arc::new(MemoryEventStore::new())).with_max_retries(config.max_append_retries);
        Self::new(config, Arc::new(MemoryWorkspaceStore::new()), audit, gateway)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn WorkspaceStore> {
        &self.store
    }

    #[must_use]
    pub fn locks(&self) -> &WorkspaceLocks {
        &self.locks
    }

    fn policy(&self) -> GatePolicy {
        GatePolicy {
            require_full_analysis: self.config.require_full_analysis,
        }
    }

    /// `NotFound` when absent, `Forbidden` when another tenant owns it
    async fn authorize(&self, ctx: &RequestContext, id: WorkspaceId) -> Result<(), EngineError> {
        match self.store.owner_of(id).await? {
            None => Err(EngineError::workspace_not_found(id)),
            Some(owner) if owner != ctx.tenant_id => {
                tracing::warn!(
                    workspace = %id,
                    tenant = %ctx.tenant_id,
                    user = %ctx.user_id,
                    "cross-tenant access refused"
                );
                Err(EngineError::Forbidden(format!("workspace {id} belongs to another tenant")))
            }
            Some(_) => Ok(()),
        }
    }

    async fn load(&self, ctx: &RequestContext, id: WorkspaceId) -> Result<WorkspaceSnapshot, EngineError> {
        self.authorize(ctx, id).await?;
        self.store
            .load(&ctx.tenant_id, id)
            .await?
            .ok_or_else(|| EngineError::workspace_not_found(id))
    }

    /// Ownership check, then the guard, then a snapshot read under it
    async fn hold(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        operation: Operation,
    ) -> Result<(WorkspaceGuard, WorkspaceSnapshot), EngineError> {
        if !ctx.role.can_mutate() {
            return Err(EngineError::Forbidden(format!("role {} is read-only", ctx.role)));
        }
        self.authorize(ctx, id).await?;
        let guard = self.locks.try_acquire(id, operation)?;
        let snapshot = self
            .store
            .load(&ctx.tenant_id, id)
            .await?
            .ok_or_else(|| EngineError::workspace_not_found(id))?;
        Ok((guard, snapshot))
    }

    /// Rescore, commit and deliver the change's audit intents
    async fn commit(
        &self,
        ctx: &RequestContext,
        snapshot: &WorkspaceSnapshot,
        mut changes: ChangeSet,
    ) -> Result<Vec<AuditEvent>, EngineError> {
        let mut preview = snapshot.clone();
        changes.apply_to(&mut preview);
        scoring::score(&preview).apply_to(&mut changes.workspace);

        let current: Vec<Uuid> = changes.outbox.iter().map(|e| e.id).collect();
        self.store.commit(&ctx.tenant_id, changes).await?;
        Ok(self.flush(&ctx.tenant_id, &current).await)
    }

    /// Deliver the tenant's whole outbox, oldest first
    ///
    /// Entries left over from an earlier failed delivery go to the chain
    /// ahead of newer ones, so chain order follows commit order. Returns
    /// the events whose outbox id is in `current`.
    async fn flush(&self, tenant_id: &TenantId, current: &[Uuid]) -> Vec<AuditEvent> {
        let pending: Vec<OutboxEntry> = match self.store.pending_outbox().await {
            Ok(entries) => entries.into_iter().filter(|e| &e.tenant_id == tenant_id).collect(),
            Err(err) => {
                tracing::warn!(tenant = %tenant_id, error = %err, "failed to read the audit outbox");
                return Vec::new();
            }
        };
        if pending.len() > current.len() {
            tracing::info!(
                tenant = %tenant_id,
                backlog = pending.len() - current.len(),
                "redelivering deferred audit intents"
            );
        }
        self.deliver(pending)
            .await
            .into_iter()
            .filter(|e| e.correlation_id.is_some_and(|c| current.contains(&c)))
            .collect()
    }

    /// Append outbox entries in order, stopping at the first failure
    ///
    /// Entries left behind stay in the outbox for [`Self::recover_outbox`].
    async fn deliver(&self, entries: Vec<OutboxEntry>) -> Vec<AuditEvent> {
        let mut events = Vec::with_capacity(entries.len());
        let mut delivered = Vec::with_capacity(entries.len());

        for entry in entries {
            match self.audit.append(entry.to_request()).await {
                Ok(event) => {
                    delivered.push(entry.id);
                    events.push(event);
                }
                Err(err) => {
                    tracing::warn!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        error = %err,
                        "audit delivery deferred"
                    );
                    break;
                }
            }
        }

        if !delivered.is_empty() {
            if let Err(err) = self.store.mark_delivered(&delivered).await {
                // Redelivery is idempotent through the correlation id.
                tracing::warn!(error = %err, "failed to clear delivered outbox entries");
            }
        }
        events
    }

    /// Deliver every audit intent a previous run committed but never appended
    ///
    /// # Errors
    /// Store failures while reading the outbox.
    #[tracing::instrument(skip(self))]
    pub async fn recover_outbox(&self) -> Result<RecoveryReport, EngineError> {
        let pending = self.store.pending_outbox().await?;
        let total = pending.len();
        let delivered = self.deliver(pending).await.len();
        let report = RecoveryReport {
            delivered,
            remaining: total - delivered,
        };
        if total > 0 {
            tracing::info!(delivered = report.delivered, remaining = report.remaining, "outbox recovered");
        }
        Ok(report)
    }

    /// Move `changes.workspace` to `to` and queue the transition record and event
    fn stage_transition(
        changes: &mut ChangeSet,
        actor: &Actor,
        to: WorkspaceState,
        reason: &str,
        auto_approved: bool,
        extra: Metadata,
    ) -> Transition {
        let now = Utc::now();
        let workspace = &mut changes.workspace;
        let from = workspace.current_state;
        workspace.current_state = to;
        workspace.state_changed_at = now;
        workspace.state_changed_by = actor.actor_id.clone();

        let transition = Transition {
            id: TransitionId::new(),
            workspace_id: workspace.id,
            from_state: from,
            to_state: to,
            triggered_by: actor.actor_id.clone(),
            reason: reason.to_string(),
            auto_approved,
            metadata: extra.clone(),
            created_at: now,
        };

        let mut metadata = extra;
        metadata.insert("fromState".into(), json!(from));
        metadata.insert("toState".into(), json!(to));
        metadata.insert("reason".into(), json!(reason));
        metadata.insert("autoApproved".into(), json!(auto_approved));
        metadata.insert("transitionId".into(), json!(transition.id));
        let entry = OutboxEntry::new(
            workspace.tenant_id.clone(),
            EventType::StateTransition,
            EntityType::Workspace,
            workspace.id,
            actor.clone(),
            metadata,
        );

        changes.transitions.push(transition.clone());
        changes.record(entry);
        tracing::info!(
            workspace = %transition.workspace_id,
            from = %from,
            to = %to,
            auto_approved,
            "state transition staged"
        );
        transition
    }
}

/// Archived, locked and terminal workspaces take no changes
///
/// Unlocking a VALIDATED workspace only opens the way to CLOSED; its
/// records stay frozen.
fn ensure_writable(snapshot: &WorkspaceSnapshot) -> Result<(), EngineError> {
    let workspace = &snapshot.workspace;
    let reason = if workspace.is_archived() {
        "workspace is archived"
    } else if workspace.locked {
        "workspace is validated and locked"
    } else {
        match workspace.current_state {
            WorkspaceState::Validated => "workspace is validated",
            WorkspaceState::Closed => "workspace is closed",
            _ => return Ok(()),
        }
    };
    Err(EngineError::Immutable {
        id: workspace.id,
        reason,
    })
}

fn require_text(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        Err(EngineError::InvalidInput(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}
