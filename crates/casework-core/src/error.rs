//! Engine error taxonomy

use crate::extraction::ExtractionError;
use crate::gate::Violation;
use crate::lock::Operation;
use crate::store::StoreError;
use crate::types::{MissingElementId, WorkspaceId, WorkspaceState};
use casework_audit::{AuditError, ChainViolation};

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The lifecycle table or the gate refused the move
    #[error("cannot move from {from} to {to}: {}", summarize(.violations))]
    InvalidStateTransition {
        from: WorkspaceState,
        to: WorkspaceState,
        violations: Vec<Violation>,
    },

    /// Refused only because blocking missing elements are unresolved
    #[error("cannot move from {from} to {to}: {} blocking element(s) unresolved", .ids.len())]
    BlockingElementsPresent {
        from: WorkspaceState,
        to: WorkspaceState,
        ids: Vec<MissingElementId>,
    },

    #[error("workspace {id} is busy with an in-flight {operation}")]
    WorkspaceLocked { id: WorkspaceId, operation: Operation },

    #[error("workspace {id} cannot be modified: {reason}")]
    Immutable { id: WorkspaceId, reason: &'static str },

    #[error(transparent)]
    ExtractionFailed(#[from] ExtractionError),

    #[error("audit chain integrity violation: {0}")]
    ChainIntegrityViolation(Box<ChainViolation>),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Audit(AuditError),
}

impl From<AuditError> for EngineError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::ChainIntegrityViolation(violation) => Self::ChainIntegrityViolation(violation),
            AuditError::InvalidMetadata(msg) => Self::InvalidInput(msg),
            other => Self::Audit(other),
        }
    }
}

impl EngineError {
    pub(crate) fn workspace_not_found(id: WorkspaceId) -> Self {
        Self::NotFound {
            entity: "workspace",
            id: id.to_string(),
        }
    }

    /// Both transition refusals, `BlockingElementsPresent` included
    #[must_use]
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateTransition { .. } | Self::BlockingElementsPresent { .. }
        )
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WorkspaceLocked { .. } => true,
            Self::ExtractionFailed(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            Self::Audit(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Only a broken audit chain needs an operator
    #[must_use]
    pub fn is_operational_incident(&self) -> bool {
        matches!(self, Self::ChainIntegrityViolation(_))
    }
}
