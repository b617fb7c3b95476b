//! Per-workspace exclusivity
//!
//! At most one mutating operation runs against a workspace at a time. A
//! second caller is refused immediately rather than queued. The holder keeps
//! a [`WorkspaceGuard`]; dropping it releases the workspace, so early
//! returns, panics and cancelled futures all let go.

use crate::error::EngineError;
use crate::types::WorkspaceId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Mutating operation holding a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Extract,
    Transition,
    MissingElement,
    Fact,
    Risk,
    Action,
    Validate,
    Unlock,
    Archive,
    LinkDuplicate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extract => "extraction",
            Self::Transition => "transition",
            Self::MissingElement => "missing-element update",
            Self::Fact => "fact entry",
            Self::Risk => "risk evaluation",
            Self::Action => "action proposal",
            Self::Validate => "validation",
            Self::Unlock => "unlock",
            Self::Archive => "archive",
            Self::LinkDuplicate => "duplicate link",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Holder {
    token: Uuid,
    operation: Operation,
    acquired_at: Instant,
}

/// Registry of held workspaces
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLocks {
    held: Arc<DashMap<WorkspaceId, Holder>>,
}

impl WorkspaceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the workspace or fail with `WorkspaceLocked`
    ///
    /// # Errors
    /// [`EngineError::WorkspaceLocked`] naming the operation already running.
    pub fn try_acquire(&self, id: WorkspaceId, operation: Operation) -> Result<WorkspaceGuard, EngineError> {
        match self.held.entry(id) {
            Entry::Occupied(entry) => {
                let holder = entry.get();
                tracing::warn!(
                    workspace = %id,
                    requested = %operation,
                    held_by = %holder.operation,
                    held_for_ms = holder.acquired_at.elapsed().as_millis(),
                    "workspace busy"
                );
                Err(EngineError::WorkspaceLocked {
                    id,
                    operation: holder.operation,
                })
            }
            Entry::Vacant(entry) => {
                let token = Uuid::new_v4();
                entry.insert(Holder {
                    token,
                    operation,
                    acquired_at: Instant::now(),
                });
                Ok(WorkspaceGuard {
                    held: Arc::clone(&self.held),
                    id,
                    token,
                    operation,
                })
            }
        }
    }

    /// Operation currently holding the workspace
    #[must_use]
    pub fn holder(&self, id: WorkspaceId) -> Option<Operation> {
        self.held.get(&id).map(|h| h.operation)
    }

    #[must_use]
    pub fn is_held(&self, id: WorkspaceId) -> bool {
        self.held.contains_key(&id)
    }
}

/// Exclusive hold on one workspace, released on drop
#[must_use = "the workspace is released as soon as the guard is dropped"]
pub struct WorkspaceGuard {
    held: Arc<DashMap<WorkspaceId, Holder>>,
    id: WorkspaceId,
    token: Uuid,
    operation: Operation,
}

impl WorkspaceGuard {
    #[must_use]
    pub fn workspace_id(&self) -> WorkspaceId {
        self.id
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl fmt::Debug for WorkspaceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceGuard")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let token = self.token;
        self.held.remove_if(&self.id, |_, holder| holder.token == token);
        tracing::trace!(workspace = %self.id, operation = %self.operation, "workspace released");
    }
}
