use super::ReasoningEngine;
use crate::context::RequestContext;
use crate::error::EngineError;
use crate::store::WorkspaceFilter;
use crate::types::{WorkspaceId, WorkspaceReasoning, WorkspaceSnapshot, WorkspaceState};
use casework_audit::{
    AuditEvent, ChainReport, EntityType, EventType, Page, TimelineQuery, TrailQuery,
};
use chrono::{DateTime, Utc};

/// Caller-facing audit trail filter; the tenant always comes from the context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrailFilter {
    pub event_type: Option<EventType>,
    pub actor_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ReasoningEngine {
    /// Workspace with all of its records
    ///
    /// # Errors
    /// `NotFound`/`Forbidden`, store failures.
    pub async fn snapshot(&self, ctx: &RequestContext, id: WorkspaceId) -> Result<WorkspaceSnapshot, EngineError> {
        self.load(ctx, id).await
    }

    /// # Errors
    /// Store failures.
    pub async fn list(&self, ctx: &RequestContext, filter: &WorkspaceFilter) -> Result<Vec<WorkspaceReasoning>, EngineError> {
        let mut rows = self.store.list(&ctx.tenant_id, filter).await?;
        rows.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(rows)
    }

    /// READY_FOR_HUMAN workspaces, best reasoned first, then oldest first
    ///
    /// # Errors
    /// Store failures.
    pub async fn triage_queue(&self, ctx: &RequestContext) -> Result<Vec<WorkspaceReasoning>, EngineError> {
        let filter = WorkspaceFilter {
            state: Some(WorkspaceState::ReadyForHuman),
            include_archived: false,
        };
        let mut rows = self.store.list(&ctx.tenant_id, &filter).await?;
        rows.sort_by(|a, b| {
            b.reasoning_quality
                .total_cmp(&a.reasoning_quality)
                .then_with(|| a.received_at.cmp(&b.received_at))
        });
        Ok(rows)
    }

    /// Tenant audit trail, newest first
    ///
    /// # Errors
    /// Audit store failures.
    pub async fn audit_trail(&self, ctx: &RequestContext, filter: TrailFilter) -> Result<Page<AuditEvent>, EngineError> {
        let limit = self.config.page_limit(filter.limit);
        let mut query = TrailQuery::new(ctx.tenant_id.clone())
            .with_range(filter.start, filter.end)
            .with_page_within(limit, filter.offset, self.config.max_page_limit);
        if let Some(event_type) = filter.event_type {
            query = query.with_event_type(event_type);
        }
        if let Some(actor_id) = filter.actor_id {
            query = query.with_actor(actor_id);
        }
        Ok(self.audit.trail(&query).await?)
    }

    /// Every event about one entity of the caller's tenant, oldest first
    ///
    /// # Errors
    /// Audit store failures.
    pub async fn audit_timeline(
        &self,
        ctx: &RequestContext,
        entity_type: EntityType,
        entity_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Page<AuditEvent>, EngineError> {
        let query = TimelineQuery::new(ctx.tenant_id.clone(), entity_type, entity_id)
            .with_page_within(self.config.page_limit(limit), offset, self.config.max_page_limit);
        Ok(self.audit.timeline(&query).await?)
    }

    /// Recompute the caller's tenant chain
    ///
    /// # Errors
    /// `ChainIntegrityViolation` naming the first bad event.
    pub async fn verify_chain(&self, ctx: &RequestContext) -> Result<ChainReport, EngineError> {
        Ok(self.audit.verify_chain(&ctx.tenant_id).await?)
    }
}
