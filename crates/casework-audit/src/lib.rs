//! Casework Audit Chain
//!
//! Append-only, per-tenant, tamper-evident event log.
//!
//! # Core Concepts
//!
//! - [`AuditEvent`]: sealed entry whose checksum covers its content and the
//!   id of the previous event in the same tenant chain
//! - [`EventStore`]: persistence seam; a single compare-and-append primitive
//!   keeps the chain linear under concurrent writers
//! - [`AuditLog`]: the writer, plus verification and paginated queries
//!
//! # Example
//!
//! ```rust,ignore
//! use casework_audit::*;
//!
//! let log = AuditLog::new(Arc::new(MemoryEventStore::new()));
//! let event = log
//!     .append(AppendRequest::new(tenant, EventType::WorkspaceCreated,
//!         EntityType::Workspace, workspace_id, Actor::system()))
//!     .await?;
//! log.verify_chain(&event.tenant_id).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod canonical;
mod error;
mod event;
mod hash;
mod log;
mod query;
mod store;

pub use canonical::canonical_json;
pub use error::{AuditError, ChainViolation, ViolationKind};
pub use event::{
    validate_metadata, Actor, ActorType, AppendRequest, AuditEvent, EntityType, EventId,
    EventType, Metadata, TenantId, MAX_METADATA_BYTES, MAX_METADATA_KEY_LEN,
};
pub use hash::{ChainHash, HashError};
pub use log::{verify_events, AuditLog, ChainReport, DEFAULT_MAX_APPEND_RETRIES};
pub use query::{
    run_timeline, run_trail, Page, TimelineQuery, TrailQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use store::{AppendOutcome, ChainHead, EventStore, MemoryEventStore};
