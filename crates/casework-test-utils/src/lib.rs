//! Testing utilities for the casework workspace
//!
//! A scripted extraction gateway, an event store that can be taken
//! offline, the OQTF fixture and engine setup helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use casework_audit::{
    AppendOutcome, AuditError, AuditEvent, AuditLog, ChainHead, EventId, EventStore, MemoryEventStore,
    Metadata, Page, TenantId, TimelineQuery, TrailQuery,
};
use casework_core::{
    CandidateContext, CandidateFact, CandidateObligation, EngineConfig, ExtractionError,
    ExtractionGateway, ExtractionRequest, ExtractionResult, InboundMessage, MemoryWorkspaceStore,
    ReasoningEngine, RequestContext, Role, SourceType,
};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One scripted gateway reply
#[derive(Debug, Clone)]
pub enum FakeReply {
    Result(ExtractionResult),
    Error(ExtractionError),
    /// Never answers; exercises the extraction timeout
    Hang,
}

/// Deterministic extraction gateway
///
/// Replies are consumed in order; once the script is empty the fallback
/// reply repeats.
#[derive(Debug)]
pub struct FakeGateway {
    script: Mutex<VecDeque<FakeReply>>,
    fallback: FakeReply,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ExtractionRequest>>,
}

impl FakeGateway {
    pub fn new(fallback: FakeReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `result`
    pub fn returning(result: ExtractionResult) -> Self {
        Self::new(FakeReply::Result(result))
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self::new(FakeReply::Error(error))
    }

    pub fn hanging() -> Self {
        Self::new(FakeReply::Hang)
    }

    /// Sleep before every reply
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply ahead of the fallback
    #[must_use]
    pub fn then(self, reply: FakeReply) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ExtractionGateway for FakeGateway {
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        let reply = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            FakeReply::Result(result) => Ok(result),
            FakeReply::Error(error) => Err(error),
            FakeReply::Hang => std::future::pending().await,
        }
    }
}

/// Body of a removal-order notice (OQTF)
pub const OQTF_NOTICE: &str = "PREFECTURE DU RHONE\n\
Objet : Obligation de quitter le territoire francais (OQTF)\n\
Notifiee le 2 mars 2026 a M. Karim B.\n\
Vous disposez d'un delai de 30 jours pour quitter le territoire.\n\
Un recours peut etre forme devant le tribunal administratif dans un delai de 30 jours.";

pub fn oqtf_message() -> InboundMessage {
    InboundMessage::new(SourceType::Letter, OQTF_NOTICE).with_sender("greffe@prefecture.example")
}

/// Facts only: auto-transition lands on FACTS_EXTRACTED
pub fn oqtf_facts() -> ExtractionResult {
    ExtractionResult {
        facts: vec![
            CandidateFact {
                label: "notification_date".into(),
                value: "2026-03-02".into(),
                confidence: 0.94,
                source_ref: Some("line 3".into()),
            },
            CandidateFact {
                label: "decision_type".into(),
                value: "OQTF".into(),
                confidence: 0.97,
                source_ref: Some("line 2".into()),
            },
            CandidateFact {
                label: "departure_delay_days".into(),
                value: "30".into(),
                confidence: 0.88,
                source_ref: Some("line 4".into()),
            },
        ],
        contexts: vec![],
        obligations: vec![],
        confidence: 0.91,
        model: "fake-extractor".into(),
        processing_time_ms: 42,
        warnings: vec![],
    }
}

/// Facts plus a context and a dated obligation
pub fn oqtf_full() -> ExtractionResult {
    let mut result = oqtf_facts();
    result.contexts.push(CandidateContext {
        context_type: "OQTF".into(),
        description: "Removal order with a 30 day departure delay".into(),
        reasoning: "Prefecture letterhead and explicit OQTF subject".into(),
        certainty_level: 0.9,
    });
    result.obligations.push(CandidateObligation {
        context_index: 0,
        description: "File an appeal before the administrative court".into(),
        mandatory: true,
        deadline: NaiveDate::from_ymd_opt(2026, 4, 1),
        critical: true,
        legal_ref: Some("CESEDA L614-1".into()),
    });
    result
}

/// Nothing recognised
pub fn empty_extraction() -> ExtractionResult {
    ExtractionResult {
        facts: vec![],
        contexts: vec![],
        obligations: vec![],
        confidence: 0.1,
        model: "fake-extractor".into(),
        processing_time_ms: 5,
        warnings: vec!["no recognisable content".into()],
    }
}

pub fn member(tenant: &str) -> RequestContext {
    RequestContext::new("agent-1", TenantId::new(tenant), Role::Member)
}

pub fn reviewer(tenant: &str) -> RequestContext {
    RequestContext::new("reviewer-1", TenantId::new(tenant), Role::Reviewer)
}

pub fn viewer(tenant: &str) -> RequestContext {
    RequestContext::new("viewer-1", TenantId::new(tenant), Role::Viewer)
}

/// In-memory engine plus a handle on its gateway
pub fn setup_engine(gateway: FakeGateway) -> (ReasoningEngine, Arc<FakeGateway>) {
    setup_engine_with(EngineConfig::default(), gateway)
}

pub fn setup_engine_with(config: EngineConfig, gateway: FakeGateway) -> (ReasoningEngine, Arc<FakeGateway>) {
    let gateway = Arc::new(gateway);
    let engine = ReasoningEngine::in_memory(config, gateway.clone());
    (engine, gateway)
}

/// Event store that refuses appends while switched off
#[derive(Debug, Default)]
pub struct FlakyEventStore {
    inner: MemoryEventStore,
    down: AtomicBool,
}

impl FlakyEventStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>, AuditError> {
        self.inner.head(tenant_id).await
    }

    async fn compare_and_append(
        &self,
        event: AuditEvent,
        expected_head: Option<EventId>,
    ) -> Result<AppendOutcome, AuditError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AuditError::Storage("connection refused".into()));
        }
        self.inner.compare_and_append(event, expected_head).await
    }

    async fn find_by_correlation(
        &self,
        tenant_id: &TenantId,
        correlation_id: Uuid,
    ) -> Result<Option<AuditEvent>, AuditError> {
        self.inner.find_by_correlation(tenant_id, correlation_id).await
    }

    async fn chain(&self, tenant_id: &TenantId) -> Result<Vec<AuditEvent>, AuditError> {
        self.inner.chain(tenant_id).await
    }

    async fn trail(&self, query: &TrailQuery) -> Result<Page<AuditEvent>, AuditError> {
        self.inner.trail(query).await
    }

    async fn timeline(&self, query: &TimelineQuery) -> Result<Page<AuditEvent>, AuditError> {
        self.inner.timeline(query).await
    }
}

/// Engine whose audit chain can be taken offline, with handles on both stores
pub fn setup_flaky_engine(gateway: FakeGateway) -> (ReasoningEngine, Arc<MemoryWorkspaceStore>, Arc<FlakyEventStore>) {
    let events = Arc::new(FlakyEventStore::default());
    let store = Arc::new(MemoryWorkspaceStore::new());
    let engine = ReasoningEngine::new(
        EngineConfig::default(),
        store.clone(),
        AuditLog::new(events.clone()),
        Arc::new(gateway),
    );
    (engine, store, events)
}

/// Metadata from a JSON object literal
pub fn metadata(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("metadata must be a JSON object, got {other}"),
    }
}
