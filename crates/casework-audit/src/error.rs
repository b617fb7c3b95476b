//! Error types for the audit chain

use crate::event::{EventId, TenantId};
use std::fmt;

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Metadata rejected before write
    #[error("invalid event metadata: {0}")]
    InvalidMetadata(String),

    /// Verification found a tampered or broken chain
    #[error("chain integrity violation: {0}")]
    ChainIntegrityViolation(Box<ChainViolation>),

    /// The head kept moving under concurrent writers
    #[error("audit chain for tenant {tenant_id} still contended after {attempts} attempts")]
    ContentionExhausted { tenant_id: TenantId, attempts: u32 },

    /// Unrecognised event or entity type name
    #[error("unknown {kind}: {name}")]
    UnknownName { kind: &'static str, name: String },

    /// Backing store failure
    #[error("event store error: {0}")]
    Storage(String),
}

impl AuditError {
    /// True only for chain violations, which must page operators
    #[inline]
    #[must_use]
    pub fn is_operational_incident(&self) -> bool {
        matches!(self, Self::ChainIntegrityViolation(_))
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ContentionExhausted { .. } | Self::Storage(_))
    }
}

/// Where and how a chain failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainViolation {
    pub tenant_id: TenantId,
    pub event_id: EventId,
    /// 0-based index in oldest-to-newest order
    pub position: usize,
    pub kind: ViolationKind,
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tenant {} event {} at position {}: {}",
            self.tenant_id, self.event_id, self.position, self.kind
        )
    }
}

/// Classification of a chain failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Stored checksum differs from the recomputed one
    ChecksumMismatch { stored: String, computed: String },
    /// `previous_event_id` does not name the preceding event
    BrokenLink {
        expected: Option<EventId>,
        found: Option<EventId>,
    },
    /// Sequence gap or timestamp moving backwards
    NonMonotonic,
    /// Event carries another tenant's id
    ForeignTenant,
    /// Event not flagged immutable
    MutableEvent,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChecksumMismatch { stored, computed } => {
                write!(f, "checksum mismatch (stored {stored}, computed {computed})")
            }
            Self::BrokenLink { expected, found } => {
                write!(f, "broken link (expected {expected:?}, found {found:?})")
            }
            Self::NonMonotonic => f.write_str("non-monotonic sequence or timestamp"),
            Self::ForeignTenant => f.write_str("event belongs to another tenant"),
            Self::MutableEvent => f.write_str("event not flagged immutable"),
        }
    }
}
