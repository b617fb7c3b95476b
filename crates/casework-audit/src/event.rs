//! Audit event types
//!
//! An [`AuditEvent`] is sealed once: its checksum covers the event type,
//! entity reference, actor, metadata and the id of the previous event in the
//! tenant chain. Stored events are never updated.

use crate::canonical::canonical_json;
use crate::error::AuditError;
use crate::hash::ChainHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form event metadata; always a JSON object
pub type Metadata = serde_json::Map<String, Value>;

/// Upper bound on the encoded size of one event's metadata
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

/// Upper bound on a metadata key
pub const MAX_METADATA_KEY_LEN: usize = 128;

/// Tenant identifier supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique event identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who caused an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    System,
    Ai,
    User,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Ai => "AI",
            Self::User => "USER",
        }
    }
}

/// Actor type plus identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub actor_type: ActorType,
    pub actor_id: String,
}

impl Actor {
    /// The engine itself
    #[must_use]
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            actor_id: "system".to_string(),
        }
    }

    /// An extraction model
    #[must_use]
    pub fn ai(model: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Ai,
            actor_id: model.into(),
        }
    }

    /// A human user
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            actor_id: user_id.into(),
        }
    }
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire name
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AuditError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        AuditError::UnknownName { kind: stringify!($name), name: s.to_string() }
                    })
            }
        }
    };
}

wire_enum! {
    /// Kind of event recorded in the chain
    EventType {
        WorkspaceCreated => "WORKSPACE_CREATED",
        StateTransition => "STATE_TRANSITION",
        FactsExtracted => "FACTS_EXTRACTED",
        ExtractionFailed => "EXTRACTION_FAILED",
        FactAdded => "FACT_ADDED",
        MissingElementAdded => "MISSING_ELEMENT_ADDED",
        MissingElementResolved => "MISSING_ELEMENT_RESOLVED",
        RiskEvaluated => "RISK_EVALUATED",
        ActionProposed => "ACTION_PROPOSED",
        WorkspaceUnlocked => "WORKSPACE_UNLOCKED",
        WorkspaceArchived => "WORKSPACE_ARCHIVED",
        DuplicateDetected => "DUPLICATE_DETECTED",
        DuplicateLinked => "DUPLICATE_LINKED",
    }
}

wire_enum! {
    /// Kind of entity an event refers to
    EntityType {
        Workspace => "WORKSPACE",
        Fact => "FACT",
        ContextHypothesis => "CONTEXT_HYPOTHESIS",
        Obligation => "OBLIGATION",
        MissingElement => "MISSING_ELEMENT",
        Risk => "RISK",
        ProposedAction => "PROPOSED_ACTION",
    }
}

/// Check metadata shape before it is written
///
/// # Errors
/// `AuditError::InvalidMetadata` on empty or oversized keys, or when the
/// encoded object exceeds [`MAX_METADATA_BYTES`].
pub fn validate_metadata(metadata: &Metadata) -> Result<(), AuditError> {
    for key in metadata.keys() {
        if key.trim().is_empty() {
            return Err(AuditError::InvalidMetadata("empty metadata key".to_string()));
        }
        if key.len() > MAX_METADATA_KEY_LEN {
            return Err(AuditError::InvalidMetadata(format!(
                "metadata key longer than {MAX_METADATA_KEY_LEN} bytes"
            )));
        }
    }
    let encoded = canonical_json(&Value::Object(metadata.clone()));
    if encoded.len() > MAX_METADATA_BYTES {
        return Err(AuditError::InvalidMetadata(format!(
            "metadata is {} bytes, limit is {MAX_METADATA_BYTES}",
            encoded.len()
        )));
    }
    Ok(())
}

/// Input to [`AuditLog::append`](crate::AuditLog::append)
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub tenant_id: TenantId,
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor: Actor,
    pub metadata: Metadata,
    /// Idempotency key: a second append with the same key returns the
    /// first event instead of extending the chain
    pub correlation_id: Option<Uuid>,
}

impl AppendRequest {
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        event_type: EventType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        actor: Actor,
    ) -> Self {
        Self {
            tenant_id,
            event_type,
            entity_type,
            entity_id: entity_id.into(),
            actor,
            metadata: Metadata::new(),
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// A sealed entry in a tenant's chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: EventId,
    pub tenant_id: TenantId,
    /// 1-based position in the tenant chain
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub metadata: Metadata,
    pub immutable: bool,
    pub checksum: ChainHash,
    pub previous_event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl AuditEvent {
    /// Build and seal the event that follows `head`
    #[must_use]
    pub fn seal(request: &AppendRequest, head: Option<&crate::store::ChainHead>, now: DateTime<Utc>) -> Self {
        let (sequence, previous_event_id, timestamp) = match head {
            Some(h) => (h.sequence + 1, Some(h.event_id), now.max(h.timestamp)),
            None => (1, None, now),
        };
        let mut event = Self {
            id: EventId::new(),
            tenant_id: request.tenant_id.clone(),
            sequence,
            timestamp,
            event_type: request.event_type,
            entity_type: request.entity_type,
            entity_id: request.entity_id.clone(),
            actor_type: request.actor.actor_type,
            actor_id: request.actor.actor_id.clone(),
            metadata: request.metadata.clone(),
            immutable: true,
            checksum: ChainHash::new([0u8; 32]),
            previous_event_id,
            correlation_id: request.correlation_id,
        };
        event.checksum = event.compute_checksum();
        event
    }

    /// Recompute the checksum from the covered fields
    #[must_use]
    pub fn compute_checksum(&self) -> ChainHash {
        let covered = json!({
            "eventType": self.event_type.as_str(),
            "entityType": self.entity_type.as_str(),
            "entityId": self.entity_id,
            "actorType": self.actor_type.as_str(),
            "actorId": self.actor_id,
            "metadata": Value::Object(self.metadata.clone()),
            "previousEventId": self.previous_event_id.map(|id| id.to_string()),
        });
        ChainHash::compute(canonical_json(&covered).as_bytes())
    }
}
