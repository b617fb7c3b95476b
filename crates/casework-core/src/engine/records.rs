//! Human-entered records: facts, missing elements, risks, actions

use super::{ensure_writable, require_text, ReasoningEngine};
use crate::context::RequestContext;
use crate::error::EngineError;
use crate::lock::Operation;
use crate::store::{ChangeSet, OutboxEntry};
use crate::types::{
    ActionId, Fact, FactId, FactSource, MissingElement, MissingElementId, MissingElementKind,
    ProposedAction, Risk, RiskId, RiskLevel, WorkspaceId,
};
use casework_audit::{EntityType, EventType, Metadata};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFact {
    pub label: String,
    pub value: String,
    pub source: FactSource,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMissingElement {
    #[serde(rename = "type")]
    pub kind: MissingElementKind,
    pub description: String,
    pub why: String,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRisk {
    pub description: String,
    pub probability: RiskLevel,
    pub impact: RiskLevel,
    #[serde(default)]
    pub irreversible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAction {
    pub action_type: String,
    pub description: String,
    #[serde(default)]
    pub rationale: String,
}

impl ReasoningEngine {
    /// Record a fact entered by a person or read from a document
    ///
    /// # Errors
    /// `InvalidInput` for AI-sourced facts (those only come from extraction),
    /// empty labels or confidence outside [0, 1]; `Immutable`;
    /// `WorkspaceLocked`; store failures.
    #[tracing::instrument(skip(self, ctx, input), fields(tenant = %ctx.tenant_id))]
    pub async fn add_fact(&self, ctx: &RequestContext, id: WorkspaceId, input: NewFact) -> Result<Fact, EngineError> {
        require_text("label", &input.label)?;
        if input.source == FactSource::Ai {
            return Err(EngineError::InvalidInput("AI facts are recorded by extraction only".into()));
        }
        if !(0.0..=1.0).contains(&input.confidence) {
            return Err(EngineError::InvalidInput(format!("confidence {} outside [0, 1]", input.confidence)));
        }

        let (_guard, snapshot) = self.hold(ctx, id, Operation::Fact).await?;
        ensure_writable(&snapshot)?;

        let fact = Fact {
            id: FactId::new(),
            workspace_id: id,
            label: input.label.trim().to_string(),
            value: input.value,
            source: input.source,
            source_ref: input.source_ref,
            confidence: input.confidence,
            extracted_by: ctx.user_id.clone(),
            created_at: Utc::now(),
        };

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        let mut metadata = Metadata::new();
        metadata.insert("workspaceId".into(), json!(id));
        metadata.insert("label".into(), json!(fact.label));
        metadata.insert("source".into(), json!(fact.source));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::FactAdded,
            EntityType::Fact,
            fact.id,
            ctx.actor(),
            metadata,
        ));
        changes.facts.push(fact.clone());
        self.commit(ctx, &snapshot, changes).await?;
        Ok(fact)
    }

    /// # Errors
    /// `InvalidInput` for empty text, `Immutable`, `WorkspaceLocked`, store
    /// failures.
    #[tracing::instrument(skip(self, ctx, input), fields(tenant = %ctx.tenant_id))]
    pub async fn add_missing_element(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        input: NewMissingElement,
    ) -> Result<MissingElement, EngineError> {
        require_text("description", &input.description)?;
        require_text("why", &input.why)?;

        let (_guard, snapshot) = self.hold(ctx, id, Operation::MissingElement).await?;
        ensure_writable(&snapshot)?;

        let element = MissingElement {
            id: MissingElementId::new(),
            workspace_id: id,
            kind: input.kind,
            description: input.description,
            why: input.why,
            blocking: input.blocking,
            resolved: false,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            identified_by: ctx.user_id.clone(),
            created_at: Utc::now(),
        };

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        let mut metadata = Metadata::new();
        metadata.insert("workspaceId".into(), json!(id));
        metadata.insert("type".into(), json!(element.kind));
        metadata.insert("blocking".into(), json!(element.blocking));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::MissingElementAdded,
            EntityType::MissingElement,
            element.id,
            ctx.actor(),
            metadata,
        ));
        changes.missing_elements.push(element.clone());
        self.commit(ctx, &snapshot, changes).await?;

        if element.blocking {
            tracing::info!(workspace = %id, element = %element.id, "blocking element added");
        }
        Ok(element)
    }

    /// # Errors
    /// `NotFound` for an unknown element, `InvalidInput` when already
    /// resolved or the resolution is empty, `Immutable`, `WorkspaceLocked`,
    /// store failures.
    #[tracing::instrument(skip(self, ctx, resolution), fields(tenant = %ctx.tenant_id))]
    pub async fn resolve_missing_element(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        element_id: MissingElementId,
        resolution: &str,
    ) -> Result<MissingElement, EngineError> {
        require_text("resolution", resolution)?;

        let (_guard, snapshot) = self.hold(ctx, id, Operation::MissingElement).await?;
        ensure_writable(&snapshot)?;

        let mut element = snapshot
            .missing_elements
            .iter()
            .find(|m| m.id == element_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                entity: "missing element",
                id: element_id.to_string(),
            })?;
        if element.resolved {
            return Err(EngineError::InvalidInput(format!("missing element {element_id} is already resolved")));
        }

        element.resolved = true;
        element.resolution = Some(resolution.trim().to_string());
        element.resolved_by = Some(ctx.user_id.clone());
        element.resolved_at = Some(Utc::now());

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        let mut metadata = Metadata::new();
        metadata.insert("workspaceId".into(), json!(id));
        metadata.insert("blocking".into(), json!(element.blocking));
        metadata.insert("resolution".into(), json!(element.resolution));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::MissingElementResolved,
            EntityType::MissingElement,
            element_id,
            ctx.actor(),
            metadata,
        ));
        changes.missing_updates.push(element.clone());
        self.commit(ctx, &snapshot, changes).await?;
        Ok(element)
    }

    /// # Errors
    /// `InvalidInput` for an empty description, `Immutable`,
    /// `WorkspaceLocked`, store failures.
    #[tracing::instrument(skip(self, ctx, input), fields(tenant = %ctx.tenant_id))]
    pub async fn evaluate_risk(&self, ctx: &RequestContext, id: WorkspaceId, input: NewRisk) -> Result<Risk, EngineError> {
        require_text("description", &input.description)?;

        let (_guard, snapshot) = self.hold(ctx, id, Operation::Risk).await?;
        ensure_writable(&snapshot)?;

        let risk = Risk {
            id: RiskId::new(),
            workspace_id: id,
            description: input.description,
            probability: input.probability,
            impact: input.impact,
            risk_score: Risk::score(input.probability, input.impact),
            irreversible: input.irreversible,
            evaluated_by: ctx.user_id.clone(),
            created_at: Utc::now(),
        };

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        let mut metadata = Metadata::new();
        metadata.insert("workspaceId".into(), json!(id));
        metadata.insert("probability".into(), json!(risk.probability));
        metadata.insert("impact".into(), json!(risk.impact));
        metadata.insert("riskScore".into(), json!(risk.risk_score));
        metadata.insert("irreversible".into(), json!(risk.irreversible));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::RiskEvaluated,
            EntityType::Risk,
            risk.id,
            ctx.actor(),
            metadata,
        ));
        changes.risks.push(risk.clone());
        self.commit(ctx, &snapshot, changes).await?;
        Ok(risk)
    }

    /// # Errors
    /// `InvalidInput` for empty type or description, `Immutable`,
    /// `WorkspaceLocked`, store failures.
    #[tracing::instrument(skip(self, ctx, input), fields(tenant = %ctx.tenant_id))]
    pub async fn propose_action(
        &self,
        ctx: &RequestContext,
        id: WorkspaceId,
        input: NewAction,
    ) -> Result<ProposedAction, EngineError> {
        require_text("actionType", &input.action_type)?;
        require_text("description", &input.description)?;

        let (_guard, snapshot) = self.hold(ctx, id, Operation::Action).await?;
        ensure_writable(&snapshot)?;

        let action = ProposedAction {
            id: ActionId::new(),
            workspace_id: id,
            action_type: input.action_type.trim().to_string(),
            description: input.description,
            rationale: input.rationale,
            proposed_by: ctx.user_id.clone(),
            created_at: Utc::now(),
        };

        let mut changes = ChangeSet::for_workspace(&snapshot.workspace);
        let mut metadata = Metadata::new();
        metadata.insert("workspaceId".into(), json!(id));
        metadata.insert("actionType".into(), json!(action.action_type));
        changes.record(OutboxEntry::new(
            ctx.tenant_id.clone(),
            EventType::ActionProposed,
            EntityType::ProposedAction,
            action.id,
            ctx.actor(),
            metadata,
        ));
        changes.actions.push(action.clone());
        self.commit(ctx, &snapshot, changes).await?;
        Ok(action)
    }
}
