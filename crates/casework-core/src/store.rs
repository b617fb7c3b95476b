//! Workspace persistence
//!
//! Every call is scoped by tenant. Mutations go through [`ChangeSet`], which
//! is applied atomically together with the audit intents it carries: either
//! the row, its new children and its outbox entries are all stored, or none
//! are. Version checks reject a change set computed from a stale snapshot.

use crate::types::{
    ContextHypothesis, Fact, MissingElement, Obligation, ProposedAction, ReasoningTrace, Risk,
    Transition, WorkspaceId, WorkspaceReasoning, WorkspaceSnapshot, WorkspaceState,
};
use async_trait::async_trait;
use casework_audit::{Actor, AppendRequest, ChainHash, EntityType, EventType, Metadata, TenantId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("workspace {0} not found")]
    NotFound(WorkspaceId),

    #[error("workspace {0} already exists")]
    AlreadyExists(WorkspaceId),

    #[error("workspace {id} changed concurrently: expected version {expected}, found {found}")]
    VersionConflict { id: WorkspaceId, expected: u64, found: u64 },

    #[error("workspace {0} belongs to another tenant")]
    TenantMismatch(WorkspaceId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::Backend(_))
    }
}

/// Audit event waiting to be appended to the tenant chain
///
/// The entry id doubles as the event's correlation id, so delivering the
/// same entry twice records one event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor: Actor,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(
        tenant_id: TenantId,
        event_type: EventType,
        entity_type: EntityType,
        entity_id: impl ToString,
        actor: Actor,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_type,
            entity_type,
            entity_id: entity_id.to_string(),
            actor,
            metadata,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn to_request(&self) -> AppendRequest {
        AppendRequest::new(
            self.tenant_id.clone(),
            self.event_type,
            self.entity_type,
            self.entity_id.clone(),
            self.actor.clone(),
        )
        .with_metadata(self.metadata.clone())
        .with_correlation_id(self.id)
    }
}

/// One atomic update of a workspace and its children
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Row as it should be stored; its version is `expected_version + 1`
    pub workspace: WorkspaceReasoning,
    pub expected_version: u64,
    pub facts: Vec<Fact>,
    pub contexts: Vec<ContextHypothesis>,
    pub obligations: Vec<Obligation>,
    pub missing_elements: Vec<MissingElement>,
    /// Replacements for existing missing elements, matched by id
    pub missing_updates: Vec<MissingElement>,
    pub risks: Vec<Risk>,
    pub actions: Vec<ProposedAction>,
    pub traces: Vec<ReasoningTrace>,
    pub transitions: Vec<Transition>,
    pub outbox: Vec<OutboxEntry>,
}

impl ChangeSet {
    /// Start a change against the stored `workspace`
    #[must_use]
    pub fn for_workspace(workspace: &WorkspaceReasoning) -> Self {
        let mut next = workspace.clone();
        next.version = workspace.version + 1;
        Self {
            workspace: next,
            expected_version: workspace.version,
            facts: Vec::new(),
            contexts: Vec::new(),
            obligations: Vec::new(),
            missing_elements: Vec::new(),
            missing_updates: Vec::new(),
            risks: Vec::new(),
            actions: Vec::new(),
            traces: Vec::new(),
            transitions: Vec::new(),
            outbox: Vec::new(),
        }
    }

    /// Queue an audit event for delivery after commit
    pub fn record(&mut self, entry: OutboxEntry) {
        self.outbox.push(entry);
    }

    /// Apply to an in-memory snapshot
    pub fn apply_to(&self, snapshot: &mut WorkspaceSnapshot) {
        snapshot.workspace = self.workspace.clone();
        snapshot.facts.extend(self.facts.iter().cloned());
        snapshot.contexts.extend(self.contexts.iter().cloned());
        snapshot.obligations.extend(self.obligations.iter().cloned());
        snapshot.missing_elements.extend(self.missing_elements.iter().cloned());
        for update in &self.missing_updates {
            if let Some(existing) = snapshot.missing_elements.iter_mut().find(|m| m.id == update.id) {
                *existing = update.clone();
            }
        }
        snapshot.risks.extend(self.risks.iter().cloned());
        snapshot.actions.extend(self.actions.iter().cloned());
        snapshot.traces.extend(self.traces.iter().cloned());
        snapshot.transitions.extend(self.transitions.iter().cloned());
    }
}

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilter {
    pub state: Option<WorkspaceState>,
    pub include_archived: bool,
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Store a new workspace together with its intake events
    async fn insert(&self, workspace: WorkspaceReasoning, outbox: Vec<OutboxEntry>) -> Result<(), StoreError>;

    /// Owning tenant, looked up before any tenant-scoped access
    async fn owner_of(&self, id: WorkspaceId) -> Result<Option<TenantId>, StoreError>;

    async fn load(&self, tenant_id: &TenantId, id: WorkspaceId) -> Result<Option<WorkspaceSnapshot>, StoreError>;

    /// Apply `changes` iff the stored version still equals `expected_version`
    async fn commit(&self, tenant_id: &TenantId, changes: ChangeSet) -> Result<(), StoreError>;

    async fn list(&self, tenant_id: &TenantId, filter: &WorkspaceFilter) -> Result<Vec<WorkspaceReasoning>, StoreError>;

    async fn find_by_content_hash(
        &self,
        tenant_id: &TenantId,
        content_hash: &ChainHash,
    ) -> Result<Vec<WorkspaceReasoning>, StoreError>;

    async fn find_by_sender(&self, tenant_id: &TenantId, sender_email: &str) -> Result<Vec<WorkspaceReasoning>, StoreError>;

    /// Undelivered audit intents across all tenants, oldest first
    async fn pending_outbox(&self) -> Result<Vec<OutboxEntry>, StoreError>;

    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    workspaces: HashMap<WorkspaceId, WorkspaceSnapshot>,
    outbox: Vec<OutboxEntry>,
}

/// In-memory workspace store
///
/// One lock covers rows and outbox so a commit is all-or-nothing.
#[derive(Debug, Default)]
pub struct MemoryWorkspaceStore {
    inner: RwLock<Inner>,
}

impl MemoryWorkspaceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of undelivered outbox entries
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.inner.read().outbox.len()
    }
}

fn tenant_rows<'a>(
    inner: &'a Inner,
    tenant_id: &'a TenantId,
) -> impl Iterator<Item = &'a WorkspaceReasoning> + 'a {
    inner
        .workspaces
        .values()
        .map(|s| &s.workspace)
        .filter(move |w| &w.tenant_id == tenant_id)
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaceStore {
    async fn insert(&self, workspace: WorkspaceReasoning, outbox: Vec<OutboxEntry>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.workspaces.contains_key(&workspace.id) {
            return Err(StoreError::AlreadyExists(workspace.id));
        }
        inner.workspaces.insert(workspace.id, WorkspaceSnapshot::new(workspace));
        inner.outbox.extend(outbox);
        Ok(())
    }

    async fn owner_of(&self, id: WorkspaceId) -> Result<Option<TenantId>, StoreError> {
        Ok(self
            .inner
            .read()
            .workspaces
            .get(&id)
            .map(|s| s.workspace.tenant_id.clone()))
    }

    async fn load(&self, tenant_id: &TenantId, id: WorkspaceId) -> Result<Option<WorkspaceSnapshot>, StoreError> {
        Ok(self
            .inner
            .read()
            .workspaces
            .get(&id)
            .filter(|s| &s.workspace.tenant_id == tenant_id)
            .cloned())
    }

    async fn commit(&self, tenant_id: &TenantId, changes: ChangeSet) -> Result<(), StoreError> {
        let id = changes.workspace.id;
        let mut inner = self.inner.write();
        let stored = inner.workspaces.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if &stored.workspace.tenant_id != tenant_id || &changes.workspace.tenant_id != tenant_id {
            return Err(StoreError::TenantMismatch(id));
        }
        if stored.workspace.version != changes.expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: changes.expected_version,
                found: stored.workspace.version,
            });
        }

        changes.apply_to(stored);
        inner.outbox.extend(changes.outbox);
        Ok(())
    }

    async fn list(&self, tenant_id: &TenantId, filter: &WorkspaceFilter) -> Result<Vec<WorkspaceReasoning>, StoreError> {
        let inner = self.inner.read();
        Ok(tenant_rows(&inner, tenant_id)
            .filter(|w| filter.include_archived || !w.is_archived())
            .filter(|w| filter.state.map_or(true, |s| w.current_state == s))
            .cloned()
            .collect())
    }

    async fn find_by_content_hash(
        &self,
        tenant_id: &TenantId,
        content_hash: &ChainHash,
    ) -> Result<Vec<WorkspaceReasoning>, StoreError> {
        let inner = self.inner.read();
        Ok(tenant_rows(&inner, tenant_id)
            .filter(|w| &w.content_hash == content_hash)
            .cloned()
            .collect())
    }

    async fn find_by_sender(&self, tenant_id: &TenantId, sender_email: &str) -> Result<Vec<WorkspaceReasoning>, StoreError> {
        let inner = self.inner.read();
        Ok(tenant_rows(&inner, tenant_id)
            .filter(|w| {
                w.sender_email
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(sender_email))
            })
            .cloned()
            .collect())
    }

    async fn pending_outbox(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self.inner.read().outbox.clone())
    }

    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        self.inner.write().outbox.retain(|e| !ids.contains(&e.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fact, workspace};

    fn entry(tenant: &TenantId, id: WorkspaceId) -> OutboxEntry {
        OutboxEntry::new(
            tenant.clone(),
            EventType::FactAdded,
            EntityType::Workspace,
            id,
            Actor::system(),
            Metadata::new(),
        )
    }

    #[tokio::test]
    async fn commit_applies_children_and_outbox_together() {
        let store = MemoryWorkspaceStore::new();
        let ws = workspace("t", WorkspaceState::Received);
        let tenant = ws.tenant_id.clone();
        store.insert(ws.clone(), vec![]).await.unwrap();

        let mut changes = ChangeSet::for_workspace(&ws);
        changes.facts.push(fact(ws.id, 0.8));
        changes.record(entry(&tenant, ws.id));
        store.commit(&tenant, changes).await.unwrap();

        let loaded = store.load(&tenant, ws.id).await.unwrap().unwrap();
        assert_eq!(loaded.facts.len(), 1);
        assert_eq!(loaded.workspace.version, ws.version + 1);
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn stale_change_set_is_rejected_whole() {
        let store = MemoryWorkspaceStore::new();
        let ws = workspace("t", WorkspaceState::Received);
        let tenant = ws.tenant_id.clone();
        store.insert(ws.clone(), vec![]).await.unwrap();

        store.commit(&tenant, ChangeSet::for_workspace(&ws)).await.unwrap();

        let mut stale = ChangeSet::for_workspace(&ws);
        stale.facts.push(fact(ws.id, 0.8));
        stale.record(entry(&tenant, ws.id));
        let err = store.commit(&tenant, stale).await.unwrap_err();

        assert!(matches!(err, StoreError::VersionConflict { expected: 1, found: 2, .. }));
        assert!(store.load(&tenant, ws.id).await.unwrap().unwrap().facts.is_empty());
        assert_eq!(store.outbox_len(), 0);
    }

    #[tokio::test]
    async fn reads_are_tenant_scoped() {
        let store = MemoryWorkspaceStore::new();
        let ws = workspace("a", WorkspaceState::Received);
        store.insert(ws.clone(), vec![]).await.unwrap();

        let other = TenantId::new("b");
        assert!(store.load(&other, ws.id).await.unwrap().is_none());
        assert!(store.find_by_content_hash(&other, &ws.content_hash).await.unwrap().is_empty());
        assert_eq!(store.owner_of(ws.id).await.unwrap(), Some(ws.tenant_id.clone()));
        assert!(matches!(
            store.commit(&other, ChangeSet::for_workspace(&ws)).await,
            Err(StoreError::TenantMismatch(_))
        ));
    }

    #[tokio::test]
    async fn delivered_entries_leave_the_outbox() {
        let store = MemoryWorkspaceStore::new();
        let ws = workspace("t", WorkspaceState::Received);
        let first = entry(&ws.tenant_id, ws.id);
        let second = entry(&ws.tenant_id, ws.id);
        store.insert(ws, vec![first.clone(), second.clone()]).await.unwrap();

        store.mark_delivered(&[first.id]).await.unwrap();
        let pending = store.pending_outbox().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[0].to_request().correlation_id, Some(second.id));
    }
}
