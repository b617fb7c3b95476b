//! Casework Core - workspace reasoning engine
//!
//! Turns inbound administrative messages into workspaces and walks them
//! through a fixed lifecycle:
//! - Intake with duplicate detection
//! - AI extraction of facts, context hypotheses and obligations
//! - Human additions: facts, missing elements, risks, proposed actions
//! - Gated transitions up to human validation and closure
//!
//! Every change is committed atomically with its audit intents and then
//! appended to the tenant's hash chain in `casework-audit`.
//!
//! # Example
//!
//! ```rust,ignore
//! use casework_core::prelude::*;
//!
//! let engine = ReasoningEngine::in_memory(EngineConfig::default(), gateway);
//! let intake = engine.receive(&ctx, InboundMessage::new(SourceType::Email, text)).await?;
//! let outcome = engine.extract(&ctx, intake.workspace.id, ExtractOptions::default()).await?;
//! engine.transition(&ctx, intake.workspace.id, WorkspaceState::ReadyForHuman, "complete").await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod context;
pub mod duplicate;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod gate;
pub mod lock;
pub mod scoring;
pub mod state_machine;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use context::{RequestContext, Role};
pub use duplicate::{ContentHasher, DuplicateCandidate, DuplicateDetector, DuplicateQuery, MatchReason};
pub use engine::{
    ExtractOptions, ExtractionOutcome, InboundMessage, IntakeOutcome, NewAction, NewFact,
    NewMissingElement, NewRisk, ReasoningEngine, RecoveryReport, TrailFilter, TransitionReceipt,
};
pub use error::EngineError;
pub use extraction::{
    CandidateContext, CandidateFact, CandidateObligation, ExtractionError, ExtractionGateway,
    ExtractionRequest, ExtractionResult,
};
pub use gate::{EntityRef, GateDecision, GatePolicy, Violation, ViolationReason};
pub use lock::{Operation, WorkspaceGuard, WorkspaceLocks};
pub use store::{ChangeSet, MemoryWorkspaceStore, OutboxEntry, StoreError, WorkspaceFilter, WorkspaceStore};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the engine
    pub use crate::{
        EngineConfig, EngineError, ExtractOptions, ExtractionGateway, InboundMessage,
        ReasoningEngine, RequestContext, Role, SourceType, WorkspaceId, WorkspaceState,
    };
    pub use casework_audit::TenantId;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
