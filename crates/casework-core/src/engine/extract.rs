use super::lifecycle::TransitionReceipt;
use super::ReasoningEngine;
use crate::context::RequestContext;
use crate::error::EngineError;
use crate::extraction::{self, ExtractionError, ExtractionRequest};
use crate::gate;
use crate::lock::Operation;
use crate::store::{ChangeSet, OutboxEntry};
use crate::types::{ContextHypothesis, Fact, Obligation, ReasoningTrace, WorkspaceId, WorkspaceSnapshot, WorkspaceState};
use casework_audit::{Actor, AppendRequest, AuditEvent, EntityType, EventType, Metadata};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

/// Per-call overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOptions {
    /// Falls back to the engine configuration
    #[serde(default)]
    pub auto_transition: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub workspace_id: WorkspaceId,
    pub facts: Vec<Fact>,
    pub contexts: Vec<ContextHypothesis>,
    pub obligations: Vec<Obligation>,
    pub trace: ReasoningTrace,
    pub transition: Option<TransitionReceipt>,
    pub events: Vec<AuditEvent>,
}

impl ReasoningEngine {
    /// Run the extraction gateway over a RECEIVED workspace
    ///
    /// The workspace is held for the whole gateway round-trip. Candidates
    /// are stored as AI-sourced records together with one reasoning trace;
    /// calling twice stores two independent sets. With auto-transition on,
    /// at most one transition is made per call.
    ///
    /// # Errors
    /// `InvalidStateTransition` unless the workspace is RECEIVED and
    /// unlocked; `ExtractionFailed` on gateway error, timeout or malformed
    /// output (state unchanged, EXTRACTION_FAILED recorded);
    /// `WorkspaceLocked`; `NotFound`/`Forbidden`; store failures.
    #[tracing::instrument(skip(self, ctx, options), fields(tenant = %ctx.tenant_id))]
    pub async fn extract(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        options: ExtractOptions,
    ) -> Result<ExtractionOutcome, EngineError> {
        let (_guard, snapshot) = self.hold(ctx, id, Operation::Extract).await?;
        self.check_extractable(&snapshot)?;

        let timeout = self.config.extraction_timeout();
        let request = ExtractionRequest {
            text: snapshot.workspace.source_raw.clone(),
            metadata: request_metadata(&snapshot),
            timeout_ms: self.config.extraction_timeout_ms,
        };

        let started = Instant::now();
        let result = match extraction::invoke(self.gateway.as_ref(), request, timeout).await {
            Ok(result) => result,
            Err(err) => {
                self.record_failure(ctx, id, &err).await;
                return Err(EngineError::ExtractionFailed(err));
            }
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let auto_transition = options.auto_transition.unwrap_or(self.config.auto_transition);
        let plan = extraction::plan(&snapshot, &result, auto_transition, Utc::now());
        let ai = Actor::ai(result.model.clone());

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        changes.facts.clone_from(&plan.facts);
        changes.contexts.clone_from(&plan.contexts);
        changes.obligations.clone_from(&plan.obligations);
        changes.traces.push(plan.trace.clone());
        if let Some(procedure_type) = &plan.procedure_type {
            changes.workspace.procedure_type = Some(procedure_type.clone());
        }

        let mut metadata = Metadata::new();
        metadata.insert("factCount".into(), json!(plan.facts.len()));
        metadata.insert("contextCount".into(), json!(plan.contexts.len()));
        metadata.insert("obligationCount".into(), json!(plan.obligations.len()));
        metadata.insert("model".into(), json!(result.model));
        metadata.insert("confidence".into(), json!(result.confidence));
        metadata.insert("processingTimeMs".into(), json!(result.processing_time_ms));
        metadata.insert("elapsedMs".into(), json!(elapsed_ms));
        metadata.insert("traceId".into(), json!(plan.trace.id));
        if !result.warnings.is_empty() {
            metadata.insert("warnings".into(), json!(result.warnings));
        }
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::FactsExtracted,
            EntityType::Workspace,
            id,
            ai.clone(),
            metadata,
        ));

        let mut transition = None;
        if let Some(target) = plan.target {
            let mut preview = snapshot.clone();
            changes.apply_to(&mut preview);
            let decision = gate::check(target, &preview, &self.policy());
            if decision.allowed {
                transition = Some(Self::stage_transition(
                    &mut changes,
                    &ai,
                    target,
                    "automatic transition after extraction",
                    true,
                    Metadata::new(),
                ));
            } else {
                tracing::warn!(
                    workspace = %id,
                    %target,
                    violations = decision.violations.len(),
                    "auto-transition skipped"
                );
            }
        }

        let events = self.commit(ctx, &snapshot, changes).await?;
        tracing::info!(
            workspace = %id,
            facts = plan.facts.len(),
            contexts = plan.contexts.len(),
            obligations = plan.obligations.len(),
            elapsed_ms,
            "extraction stored"
        );

        Ok(ExtractionOutcome {
            workspace_id: id,
            transition: transition.map(|t| TransitionReceipt::new(&t, &events)),
            facts: plan.facts,
            contexts: plan.contexts,
            obligations: plan.obligations,
            trace: plan.trace,
            events,
        })
    }

    fn check_extractable(&self, snapshot: &WorkspaceSnapshot) -> Result<(), EngineError> {
        let from = snapshot.state();
        if from == WorkspaceState::Received && !snapshot.workspace.locked && !snapshot.workspace.is_archived() {
            return Ok(());
        }
        // Report through the gate so the caller sees the same violations a
        // transition request would.
        let mut violations = gate::check(WorkspaceState::FactsExtracted, snapshot, &self.policy()).violations;
        violations.retain(|v| v.reason != gate::ViolationReason::NoFacts);
        if violations.is_empty() {
            violations.push(gate::Violation {
                entity: gate::EntityRef::new(EntityType::Workspace, snapshot.id()),
                reason: gate::ViolationReason::IllegalTransition {
                    from,
                    to: WorkspaceState::FactsExtracted,
                },
            });
        }
        Err(EngineError::InvalidStateTransition {
            from,
            to: WorkspaceState::FactsExtracted,
            violations,
        })
    }

    /// Best effort; the caller gets the extraction error either way
    async fn record_failure(&self, ctx: &RequestContext, id: WorkspaceId, err: &ExtractionError) {
        tracing::warn!(workspace = %id, error = %err, code = err.code(), "extraction failed");
        let mut metadata = Metadata::new();
        metadata.insert("code".into(), json!(err.code()));
        metadata.insert("error".into(), json!(err.to_string()));
        metadata.insert("retryable".into(), json!(err.is_retryable()));
        let request = AppendRequest::new(
            ctx.tenant_id.clone(),
            EventType::ExtractionFailed,
            EntityType::Workspace,
            id.to_string(),
            ctx.actor(),
        )
        .with_metadata(metadata);
        self.flush(&ctx.tenant_id, &[]).await;
        if let Err(audit_err) = self.audit.append(request).await {
            tracing::warn!(workspace = %id, error = %audit_err, "failed to record extraction failure");
        }
    }
}

fn request_metadata(snapshot: &WorkspaceSnapshot) -> Metadata {
    let workspace = &snapshot.workspace;
    let mut metadata = workspace.source_metadata.clone();
    metadata.insert("workspaceId".into(), json!(workspace.id));
    metadata.insert("sourceType".into(), json!(workspace.source_type));
    metadata.insert("receivedAt".into(), json!(workspace.received_at));
    if let Some(sender) = &workspace.sender_email {
        metadata.insert("senderEmail".into(), json!(sender));
    }
    metadata
}
