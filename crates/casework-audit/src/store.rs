//! Event persistence
//!
//! [`EventStore`] is the seam to whatever database backs the chain. The
//! only write it offers is [`EventStore::compare_and_append`], which inserts
//! an event only while the tenant head is still the one the event was sealed
//! against. That single primitive is what keeps the chain from branching.

use crate::error::AuditError;
use crate::event::{AuditEvent, EventId, Metadata, TenantId};
use crate::query::{run_timeline, run_trail, Page, TimelineQuery, TrailQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use uuid::Uuid;

/// Latest event of a tenant chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub event_id: EventId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<&AuditEvent> for ChainHead {
    fn from(event: &AuditEvent) -> Self {
        Self {
            event_id: event.id,
            sequence: event.sequence,
            timestamp: event.timestamp,
        }
    }
}

/// Result of a conditional append
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The event is now the tenant head
    Appended,
    /// Another writer moved the head first; reseal and retry
    HeadMoved { current: Option<EventId> },
    /// An event with the same correlation id already exists
    AlreadyRecorded(Box<AuditEvent>),
}

/// Tenant-scoped event persistence
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Current head of the tenant chain, `None` when empty
    async fn head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>, AuditError>;

    /// Insert `event` iff the tenant head id equals `expected_head`
    async fn compare_and_append(
        &self,
        event: AuditEvent,
        expected_head: Option<EventId>,
    ) -> Result<AppendOutcome, AuditError>;

    /// Event previously appended under `correlation_id`
    async fn find_by_correlation(
        &self,
        tenant_id: &TenantId,
        correlation_id: Uuid,
    ) -> Result<Option<AuditEvent>, AuditError>;

    /// Whole chain, oldest first
    async fn chain(&self, tenant_id: &TenantId) -> Result<Vec<AuditEvent>, AuditError>;

    async fn trail(&self, query: &TrailQuery) -> Result<Page<AuditEvent>, AuditError>;

    async fn timeline(&self, query: &TimelineQuery) -> Result<Page<AuditEvent>, AuditError>;
}

#[derive(Debug, Default)]
struct TenantChain {
    events: Vec<AuditEvent>,
    by_correlation: HashMap<Uuid, usize>,
}

/// In-memory event store
///
/// Each tenant chain lives behind one `DashMap` entry; holding the entry
/// guard for the head check and the push makes the append atomic.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    tenants: DashMap<TenantId, TenantChain>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events in a tenant chain
    #[must_use]
    pub fn len(&self, tenant_id: &TenantId) -> usize {
        self.tenants.get(tenant_id).map_or(0, |c| c.events.len())
    }

    /// Whether the tenant has no events
    #[must_use]
    pub fn is_empty(&self, tenant_id: &TenantId) -> bool {
        self.len(tenant_id) == 0
    }

    /// Overwrite a stored event's metadata in place, bypassing the chain
    ///
    /// Simulates an out-of-band edit of a database row. Nothing in the
    /// crates calls this; it exists so verification can be exercised
    /// against a tampered chain.
    pub fn rewrite_metadata(&self, tenant_id: &TenantId, event_id: EventId, metadata: Metadata) -> bool {
        let Some(mut chain) = self.tenants.get_mut(tenant_id) else {
            return false;
        };
        match chain.events.iter_mut().find(|e| e.id == event_id) {
            Some(event) => {
                event.metadata = metadata;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>, AuditError> {
        Ok(self
            .tenants
            .get(tenant_id)
            .and_then(|c| c.events.last().map(ChainHead::from)))
    }

    async fn compare_and_append(
        &self,
        event: AuditEvent,
        expected_head: Option<EventId>,
    ) -> Result<AppendOutcome, AuditError> {
        let mut chain = self.tenants.entry(event.tenant_id.clone()).or_default();

        if let Some(correlation_id) = event.correlation_id {
            if let Some(&idx) = chain.by_correlation.get(&correlation_id) {
                return Ok(AppendOutcome::AlreadyRecorded(Box::new(chain.events[idx].clone())));
            }
        }

        let current = chain.events.last().map(|e| e.id);
        if current != expected_head || event.previous_event_id != expected_head {
            return Ok(AppendOutcome::HeadMoved { current });
        }

        let idx = chain.events.len();
        if let Some(correlation_id) = event.correlation_id {
            chain.by_correlation.insert(correlation_id, idx);
        }
        chain.events.push(event);
        Ok(AppendOutcome::Appended)
    }

    async fn find_by_correlation(
        &self,
        tenant_id: &TenantId,
        correlation_id: Uuid,
    ) -> Result<Option<AuditEvent>, AuditError> {
        Ok(self.tenants.get(tenant_id).and_then(|c| {
            c.by_correlation
                .get(&correlation_id)
                .map(|&idx| c.events[idx].clone())
        }))
    }

    async fn chain(&self, tenant_id: &TenantId) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self
            .tenants
            .get(tenant_id)
            .map(|c| c.events.clone())
            .unwrap_or_default())
    }

    async fn trail(&self, query: &TrailQuery) -> Result<Page<AuditEvent>, AuditError> {
        Ok(match self.tenants.get(&query.tenant_id) {
            Some(chain) => run_trail(&chain.events, query),
            None => Page::slice(Vec::new(), query.limit, query.offset),
        })
    }

    async fn timeline(&self, query: &TimelineQuery) -> Result<Page<AuditEvent>, AuditError> {
        Ok(match self.tenants.get(&query.tenant_id) {
            Some(chain) => run_timeline(&chain.events, query),
            None => Page::slice(Vec::new(), query.limit, query.offset),
        })
    }
}
