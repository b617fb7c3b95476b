//! The tenant audit chain
//!
//! [`AuditLog`] is the only writer of [`AuditEvent`]s. Appends seal the
//! event against the current head and publish it with a compare-and-swap;
//! when another writer wins the race the event is resealed against the new
//! head. Verification never repairs anything: the first inconsistency is
//! reported and logged as an incident.

use crate::error::{AuditError, ChainViolation, ViolationKind};
use crate::event::{validate_metadata, AppendRequest, AuditEvent, EventId, TenantId};
use crate::query::{Page, TimelineQuery, TrailQuery};
use crate::store::{AppendOutcome, EventStore};
use chrono::Utc;
use std::sync::Arc;

/// Default number of reseal attempts before giving up on a contended head
pub const DEFAULT_MAX_APPEND_RETRIES: u32 = 16;

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub tenant_id: TenantId,
    pub events_checked: usize,
    pub head: Option<EventId>,
}

/// Append-only, per-tenant, hash-chained event log
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn EventStore>,
    max_retries: u32,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_APPEND_RETRIES,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Append one event to the tenant chain
    ///
    /// # Errors
    /// - `InvalidMetadata` if the metadata fails validation
    /// - `ContentionExhausted` if the head moved on every attempt
    /// - `Storage` on backend failure
    #[tracing::instrument(
        skip(self, request),
        fields(tenant = %request.tenant_id, event_type = %request.event_type)
    )]
    pub async fn append(&self, request: AppendRequest) -> Result<AuditEvent, AuditError> {
        validate_metadata(&request.metadata)?;

        if let Some(correlation_id) = request.correlation_id {
            if let Some(existing) = self
                .store
                .find_by_correlation(&request.tenant_id, correlation_id)
                .await?
            {
                tracing::debug!(event_id = %existing.id, "event already recorded");
                return Ok(existing);
            }
        }

        let attempts = self.max_retries.saturating_add(1);
        for attempt in 0..attempts {
            let head = self.store.head(&request.tenant_id).await?;
            let event = AuditEvent::seal(&request, head.as_ref(), Utc::now());
            let expected = head.map(|h| h.event_id);

            match self.store.compare_and_append(event.clone(), expected).await? {
                AppendOutcome::Appended => {
                    tracing::debug!(event_id = %event.id, sequence = event.sequence, "event appended");
                    return Ok(event);
                }
                AppendOutcome::AlreadyRecorded(existing) => return Ok(*existing),
                AppendOutcome::HeadMoved { current } => {
                    tracing::warn!(attempt, ?current, "audit chain head moved, resealing");
                }
            }
        }

        Err(AuditError::ContentionExhausted {
            tenant_id: request.tenant_id,
            attempts,
        })
    }

    /// Walk the tenant chain oldest to newest, recomputing every checksum
    ///
    /// # Errors
    /// `ChainIntegrityViolation` naming the first bad event.
    #[tracing::instrument(skip(self), fields(tenant = %tenant_id))]
    pub async fn verify_chain(&self, tenant_id: &TenantId) -> Result<ChainReport, AuditError> {
        let events = self.store.chain(tenant_id).await?;
        match verify_events(tenant_id, &events) {
            Ok(report) => {
                tracing::info!(events = report.events_checked, "audit chain verified");
                Ok(report)
            }
            Err(violation) => {
                tracing::error!(
                    target: "casework::incident",
                    tenant = %violation.tenant_id,
                    event_id = %violation.event_id,
                    position = violation.position,
                    kind = %violation.kind,
                    "audit chain integrity violation"
                );
                Err(AuditError::ChainIntegrityViolation(Box::new(violation)))
            }
        }
    }

    /// Paginated audit trail, newest first
    ///
    /// # Errors
    /// `Storage` on backend failure.
    pub async fn trail(&self, query: &TrailQuery) -> Result<Page<AuditEvent>, AuditError> {
        self.store.trail(query).await
    }

    /// Every event for one entity, oldest first
    ///
    /// # Errors
    /// `Storage` on backend failure.
    pub async fn timeline(&self, query: &TimelineQuery) -> Result<Page<AuditEvent>, AuditError> {
        self.store.timeline(query).await
    }
}

/// Check an ordered chain without touching storage
///
/// # Errors
/// The first [`ChainViolation`] found.
pub fn verify_events(tenant_id: &TenantId, events: &[AuditEvent]) -> Result<ChainReport, ChainViolation> {
    let mut previous: Option<&AuditEvent> = None;

    for (position, event) in events.iter().enumerate() {
        let violation = |kind| ChainViolation {
            tenant_id: tenant_id.clone(),
            event_id: event.id,
            position,
            kind,
        };

        if &event.tenant_id != tenant_id {
            return Err(violation(ViolationKind::ForeignTenant));
        }

        let expected_link = previous.map(|p| p.id);
        if event.previous_event_id != expected_link {
            return Err(violation(ViolationKind::BrokenLink {
                expected: expected_link,
                found: event.previous_event_id,
            }));
        }

        let expected_sequence = previous.map_or(1, |p| p.sequence + 1);
        let timestamp_regressed = previous.is_some_and(|p| event.timestamp < p.timestamp);
        if event.sequence != expected_sequence || timestamp_regressed {
            return Err(violation(ViolationKind::NonMonotonic));
        }

        if !event.immutable {
            return Err(violation(ViolationKind::MutableEvent));
        }

        let computed = event.compute_checksum();
        if computed != event.checksum {
            return Err(violation(ViolationKind::ChecksumMismatch {
                stored: event.checksum.to_string(),
                computed: computed.to_string(),
            }));
        }

        previous = Some(event);
    }

    Ok(ChainReport {
        tenant_id: tenant_id.clone(),
        events_checked: events.len(),
        head: previous.map(|e| e.id),
    })
}
