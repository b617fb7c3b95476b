//! Casework Server
//!
//! HTTP surface over [`casework_core::ReasoningEngine`] plus the reqwest
//! client for the extraction service.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;

pub use config::{ConfigError, GatewayConfig, ServerConfig};
pub use error::ApiError;
pub use gateway::HttpExtractionGateway;
pub use routes::{identity, router, Caller};

use casework_audit::{AuditLog, MemoryEventStore};
use casework_core::{MemoryWorkspaceStore, ReasoningEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Engine over the in-memory stores, talking to the configured gateway
///
/// # Errors
/// The HTTP client could not be built.
pub fn build_engine(config: &ServerConfig) -> Result<ReasoningEngine, reqwest::Error> {
    let gateway = HttpExtractionGateway::new(&config.gateway, config.engine.extraction_timeout())?;
    let audit = AuditLog::new(Arc::new(MemoryEventStore::new())).with_max_retries(config.engine.max_append_retries);
    Ok(ReasoningEngine::new(
        config.engine.clone(),
        Arc::new(MemoryWorkspaceStore::new()),
        audit,
        Arc::new(gateway),
    ))
}

/// Redeliver deferred audit intents every `every` until aborted
///
/// Commits already drain their own tenant's backlog; this covers tenants
/// that go quiet after an audit outage.
pub fn spawn_outbox_worker(engine: ReasoningEngine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = engine.recover_outbox().await {
                tracing::warn!(error = %err, "audit outbox pass failed");
            }
        }
    })
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
