//! Paginated queries over a tenant chain

use crate::event::{AuditEvent, EntityType, EventType, TenantId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Page size used when the caller gives none
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Largest page a caller may request
pub const MAX_PAGE_LIMIT: usize = 500;

/// Filtered audit trail for one tenant, newest first
#[derive(Debug, Clone)]
pub struct TrailQuery {
    pub tenant_id: TenantId,
    pub event_type: Option<EventType>,
    pub actor_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl TrailQuery {
    #[must_use]
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            event_type: None,
            actor_id: None,
            start: None,
            end: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Inclusive date range; either bound may be open
    #[must_use]
    pub fn with_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    #[must_use]
    pub fn with_page(self, limit: usize, offset: usize) -> Self {
        self.with_page_within(limit, offset, MAX_PAGE_LIMIT)
    }

    /// Like [`Self::with_page`] with a deployment-chosen ceiling
    #[must_use]
    pub fn with_page_within(mut self, limit: usize, offset: usize, max: usize) -> Self {
        self.limit = limit.clamp(1, max.max(1));
        self.offset = offset;
        self
    }

    /// Whether `event` passes every filter
    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if event.tenant_id != self.tenant_id {
            return false;
        }
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(ref actor_id) = self.actor_id {
            if &event.actor_id != actor_id {
                return false;
            }
        }
        if let Some(start) = self.start {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// Every event for one entity, oldest first
#[derive(Debug, Clone)]
pub struct TimelineQuery {
    pub tenant_id: TenantId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub limit: usize,
    pub offset: usize,
}

impl TimelineQuery {
    #[must_use]
    pub fn new(tenant_id: TenantId, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            entity_type,
            entity_id: entity_id.into(),
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }

    #[must_use]
    pub fn with_page(self, limit: usize, offset: usize) -> Self {
        self.with_page_within(limit, offset, MAX_PAGE_LIMIT)
    }

    #[must_use]
    pub fn with_page_within(mut self, limit: usize, offset: usize, max: usize) -> Self {
        self.limit = limit.clamp(1, max.max(1));
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        event.tenant_id == self.tenant_id
            && event.entity_type == self.entity_type
            && event.entity_id == self.entity_id
    }
}

/// One page of results plus pagination facts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Cut one page out of an already ordered, fully filtered list
    #[must_use]
    pub fn slice(all: Vec<T>, limit: usize, offset: usize) -> Self {
        let total = all.len();
        let items: Vec<T> = all.into_iter().skip(offset).take(limit).collect();
        let has_more = offset.saturating_add(items.len()) < total;
        Self {
            items,
            total,
            limit,
            offset,
            has_more,
        }
    }

    /// Transform the items, keeping pagination
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            has_more: self.has_more,
        }
    }
}

/// Apply a trail query to a chain held in oldest-to-newest order
#[must_use]
pub fn run_trail(chain: &[AuditEvent], query: &TrailQuery) -> Page<AuditEvent> {
    let matching: Vec<AuditEvent> = chain
        .iter()
        .rev()
        .filter(|e| query.matches(e))
        .cloned()
        .collect();
    Page::slice(matching, query.limit, query.offset)
}

/// Apply a timeline query to a chain held in oldest-to-newest order
#[must_use]
pub fn run_timeline(chain: &[AuditEvent], query: &TimelineQuery) -> Page<AuditEvent> {
    let mut matching: Vec<AuditEvent> = chain
        .iter()
        .filter(|e| query.matches(e))
        .cloned()
        .collect();
    matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
    Page::slice(matching, query.limit, query.offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_slice_reports_has_more() {
        let page = Page::slice((0..10).collect::<Vec<_>>(), 4, 0);
        assert_eq!(page.items, vec![0, 1, 2, 3]);
        assert_eq!(page.total, 10);
        assert!(page.has_more);

        let last = Page::slice((0..10).collect::<Vec<_>>(), 4, 8);
        assert_eq!(last.items, vec![8, 9]);
        assert!(!last.has_more);

        let past_end = Page::slice((0..3).collect::<Vec<_>>(), 4, 10);
        assert!(past_end.items.is_empty());
        assert!(!past_end.has_more);
    }

    #[test]
    fn limit_is_clamped() {
        let query = TrailQuery::new(TenantId::new("t")).with_page(0, 0);
        assert_eq!(query.limit, 1);
        let query = TrailQuery::new(TenantId::new("t")).with_page(10_000, 0);
        assert_eq!(query.limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn configured_ceiling_replaces_the_default() {
        let query = TrailQuery::new(TenantId::new("t")).with_page_within(800, 0, 1_000);
        assert_eq!(query.limit, 800);
        let query = TimelineQuery::new(TenantId::new("t"), EntityType::Workspace, "w").with_page_within(800, 0, 100);
        assert_eq!(query.limit, 100);
        let query = TrailQuery::new(TenantId::new("t")).with_page_within(5, 0, 0);
        assert_eq!(query.limit, 1);
    }
}
