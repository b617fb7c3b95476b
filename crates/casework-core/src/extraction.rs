//! AI extraction
//!
//! The gateway only proposes candidates. [`invoke`] bounds the call with a
//! timeout and rejects malformed results; [`plan`] turns an accepted result
//! into records and an optional auto-transition without touching storage.

use crate::types::{
    ContextHypothesis, ContextId, Fact, FactId, FactSource, Obligation, ObligationId,
    ReasoningTrace, TraceId, WorkspaceSnapshot, WorkspaceState,
};
use async_trait::async_trait;
use casework_audit::Metadata;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Input handed to the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub text: String,
    pub metadata: Metadata,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFact {
    pub label: String,
    pub value: String,
    pub confidence: f64,
    #[serde(default)]
    pub source_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateContext {
    #[serde(rename = "type")]
    pub context_type: String,
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
    pub certainty_level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateObligation {
    /// Index into [`ExtractionResult::contexts`]
    pub context_index: usize,
    pub description: String,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub legal_ref: Option<String>,
}

/// What the model proposes for one workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    #[serde(default)]
    pub facts: Vec<CandidateFact>,
    #[serde(default)]
    pub contexts: Vec<CandidateContext>,
    #[serde(default)]
    pub obligations: Vec<CandidateObligation>,
    pub confidence: f64,
    pub model: String,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("extraction gateway unavailable: {0}")]
    Unavailable(String),

    #[error("extraction gateway rejected the request: {0}")]
    Rejected(String),

    #[error("malformed extraction result: {0}")]
    Malformed(String),
}

impl ExtractionError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }

    /// Short code recorded in the failure event
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TIMEOUT",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Rejected(_) => "REJECTED",
            Self::Malformed(_) => "MALFORMED",
        }
    }
}

/// Source of extraction candidates
///
/// Implementations must not mutate anything; they are called while the
/// workspace is held and may be cancelled at any await point.
#[async_trait]
pub trait ExtractionGateway: Send + Sync {
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult, ExtractionError>;
}

fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

impl ExtractionResult {
    /// Reject results the engine cannot store as-is
    ///
    /// # Errors
    /// [`ExtractionError::Malformed`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        let malformed = |msg: String| Err(ExtractionError::Malformed(msg));

        if !unit_interval(self.confidence) {
            return malformed(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if self.model.trim().is_empty() {
            return malformed("model name is empty".into());
        }
        for (i, fact) in self.facts.iter().enumerate() {
            if fact.label.trim().is_empty() {
                return malformed(format!("fact {i} has an empty label"));
            }
            if !unit_interval(fact.confidence) {
                return malformed(format!("fact {i} confidence {} outside [0, 1]", fact.confidence));
            }
        }
        for (i, context) in self.contexts.iter().enumerate() {
            if context.context_type.trim().is_empty() {
                return malformed(format!("context {i} has an empty type"));
            }
            if !unit_interval(context.certainty_level) {
                return malformed(format!(
                    "context {i} certainty {} outside [0, 1]",
                    context.certainty_level
                ));
            }
        }
        for (i, obligation) in self.obligations.iter().enumerate() {
            if obligation.context_index >= self.contexts.len() {
                return malformed(format!(
                    "obligation {i} refers to context {} of {}",
                    obligation.context_index,
                    self.contexts.len()
                ));
            }
            if obligation.description.trim().is_empty() {
                return malformed(format!("obligation {i} has an empty description"));
            }
        }
        Ok(())
    }
}

/// Call the gateway under `timeout` and validate what comes back
///
/// # Errors
/// `Timeout` when the deadline passes, the gateway's own error, or
/// `Malformed` when the result fails [`ExtractionResult::validate`].
pub async fn invoke(
    gateway: &dyn ExtractionGateway,
    request: ExtractionRequest,
    timeout: Duration,
) -> Result<ExtractionResult, ExtractionError> {
    let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let result = tokio::time::timeout(timeout, gateway.extract(request))
        .await
        .map_err(|_| ExtractionError::Timeout { after_ms })??;
    result.validate()?;
    Ok(result)
}

/// Records to persist for one accepted extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPlan {
    pub facts: Vec<Fact>,
    pub contexts: Vec<ContextHypothesis>,
    pub obligations: Vec<Obligation>,
    pub trace: ReasoningTrace,
    /// Set when the most specific candidate type was found
    pub procedure_type: Option<String>,
    pub target: Option<WorkspaceState>,
}

/// Turn a validated result into workspace records
///
/// Candidates are stored as proposed by the model; nothing is merged with
/// earlier extractions. `auto_transition` picks CONTEXT_IDENTIFIED when any
/// context was found, else FACTS_EXTRACTED when any fact was found.
#[must_use]
pub fn plan(
    snapshot: &WorkspaceSnapshot,
    result: &ExtractionResult,
    auto_transition: bool,
    now: DateTime<Utc>,
) -> ExtractionPlan {
    let workspace_id = snapshot.id();
    let model = result.model.clone();

    let facts: Vec<Fact> = result
        .facts
        .iter()
        .map(|c| Fact {
            id: FactId::new(),
            workspace_id,
            label: c.label.trim().to_string(),
            value: c.value.clone(),
            source: FactSource::Ai,
            source_ref: c.source_ref.clone(),
            confidence: c.confidence,
            extracted_by: model.clone(),
            created_at: now,
        })
        .collect();

    let contexts: Vec<ContextHypothesis> = result
        .contexts
        .iter()
        .map(|c| ContextHypothesis {
            id: ContextId::new(),
            workspace_id,
            context_type: c.context_type.trim().to_string(),
            description: c.description.clone(),
            reasoning: c.reasoning.clone(),
            certainty_level: c.certainty_level,
            identified_by: model.clone(),
            created_at: now,
        })
        .collect();

    let obligations: Vec<Obligation> = result
        .obligations
        .iter()
        .filter_map(|c| {
            let context = contexts.get(c.context_index)?;
            Some(Obligation {
                id: ObligationId::new(),
                workspace_id,
                context_id: context.id,
                description: c.description.clone(),
                mandatory: c.mandatory,
                deadline: c.deadline,
                critical: c.critical,
                legal_ref: c.legal_ref.clone(),
                deduced_by: model.clone(),
                created_at: now,
            })
        })
        .collect();

    let procedure_type = snapshot
        .workspace
        .procedure_type
        .is_none()
        .then(|| {
            contexts
                .iter()
                .max_by(|a, b| a.certainty_level.total_cmp(&b.certainty_level))
                .map(|c| c.context_type.clone())
        })
        .flatten();

    let target = if !auto_transition {
        None
    } else if !contexts.is_empty() {
        Some(WorkspaceState::ContextIdentified)
    } else if !facts.is_empty() {
        Some(WorkspaceState::FactsExtracted)
    } else {
        None
    };

    let trace = ReasoningTrace {
        id: TraceId::new(),
        workspace_id,
        step: "EXTRACTION".into(),
        model,
        processing_time_ms: result.processing_time_ms,
        confidence: result.confidence,
        summary: format!(
            "{} facts, {} contexts, {} obligations",
            facts.len(),
            contexts.len(),
            obligations.len()
        ),
        warnings: result.warnings.clone(),
        created_at: now,
    };

    ExtractionPlan {
        facts,
        contexts,
        obligations,
        trace,
        procedure_type,
        target,
    }
}
