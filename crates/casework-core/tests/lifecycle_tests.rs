//! End-to-end workspace lifecycle against the in-memory stores

use casework_audit::{EventType, TenantId};
use casework_core::prelude::*;
use casework_core::{
    EngineError, ExtractionError, FactSource, MatchReason, MissingElementKind, NewAction, NewFact,
    NewMissingElement, NewRisk, RiskLevel, TrailFilter,
};
use casework_test_utils::*;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

async fn chain_len(engine: &ReasoningEngine, ctx: &RequestContext) -> usize {
    engine.verify_chain(ctx).await.unwrap().events_checked
}

fn blocking_document() -> NewMissingElement {
    NewMissingElement {
        kind: MissingElementKind::Document,
        description: "Signed copy of the prefecture decision".into(),
        why: "The appeal deadline runs from the notification date on the signed copy".into(),
        blocking: true,
    }
}

async fn ready_for_human(engine: &ReasoningEngine, ctx: &RequestContext) -> WorkspaceId {
    let id = engine.receive(ctx, oqtf_message()).await.unwrap().workspace.id;
    engine.extract(ctx, id, ExtractOptions::default()).await.unwrap();
    engine
        .transition(ctx, id, WorkspaceState::ReadyForHuman, "analysis complete")
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn oqtf_notice_blocks_until_missing_document_is_resolved() {
    let (engine, gateway) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("prefecture-lyon");

    let intake = engine.receive(&ctx, oqtf_message()).await.unwrap();
    let id = intake.workspace.id;
    assert_eq!(intake.workspace.current_state, WorkspaceState::Received);

    let outcome = engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();
    assert_eq!(gateway.calls(), 1);
    assert!(outcome
        .facts
        .iter()
        .any(|f| NaiveDate::parse_from_str(&f.value, "%Y-%m-%d").is_ok()));
    let auto = outcome.transition.expect("auto-transition");
    assert_eq!((auto.from_state, auto.to_state), (WorkspaceState::Received, WorkspaceState::FactsExtracted));
    assert!(auto.auto_approved);

    let element = engine.add_missing_element(&ctx, id, blocking_document()).await.unwrap();

    let before = chain_len(&engine, &ctx).await;
    match engine.transition(&ctx, id, WorkspaceState::ReadyForHuman, "ready").await {
        Err(EngineError::BlockingElementsPresent { ids, .. }) => assert_eq!(ids, vec![element.id]),
        other => panic!("expected BlockingElementsPresent, got {other:?}"),
    }
    assert_eq!(engine.snapshot(&ctx, id).await.unwrap().state(), WorkspaceState::FactsExtracted);
    assert_eq!(chain_len(&engine, &ctx).await, before);

    engine
        .resolve_missing_element(&ctx, id, element.id, "Signed copy received by mail")
        .await
        .unwrap();

    let before = chain_len(&engine, &ctx).await;
    let receipt = engine
        .transition(&ctx, id, WorkspaceState::ReadyForHuman, "ready")
        .await
        .unwrap();
    assert_eq!(chain_len(&engine, &ctx).await, before + 1);
    assert!(receipt.event_id.is_some());

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert_eq!(snapshot.state(), WorkspaceState::ReadyForHuman);
    assert_eq!(snapshot.transitions.len(), 2);
    assert!(snapshot.workspace.confidence_score > 0.8);
}

#[tokio::test]
async fn full_extraction_reaches_context_identified_and_sets_procedure() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_full()));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let outcome = engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();
    assert_eq!(outcome.transition.unwrap().to_state, WorkspaceState::ContextIdentified);
    assert_eq!(outcome.obligations[0].context_id, outcome.contexts[0].id);

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert_eq!(snapshot.workspace.procedure_type.as_deref(), Some("OQTF"));
    assert_eq!(snapshot.traces.len(), 1);
    assert!(snapshot.workspace.reasoning_quality > 0.6);
}

#[tokio::test]
async fn double_extraction_stores_two_fact_sets_and_transitions_once() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let first = engine
        .extract(&ctx, id, ExtractOptions { auto_transition: Some(false) })
        .await
        .unwrap();
    assert!(first.transition.is_none());

    let second = engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();
    assert!(second.transition.is_some());

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert_eq!(snapshot.facts.len(), 2 * oqtf_facts().facts.len());
    assert_eq!(snapshot.transitions.len(), 1);
    assert_eq!(snapshot.traces.len(), 2);

    // No longer RECEIVED.
    let err = engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn extraction_failure_leaves_state_and_records_event() {
    let (engine, _) = setup_engine(FakeGateway::failing(ExtractionError::Unavailable("503".into())));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let err = engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::ExtractionFailed(ExtractionError::Unavailable(_))));
    assert!(err.is_retryable());

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert_eq!(snapshot.state(), WorkspaceState::Received);
    assert!(snapshot.facts.is_empty());
    assert!(!engine.locks().is_held(id));

    let failures = engine
        .audit_trail(&ctx, TrailFilter { event_type: Some(EventType::ExtractionFailed), ..TrailFilter::default() })
        .await
        .unwrap();
    assert_eq!(failures.total, 1);
    assert_eq!(failures.items[0].metadata["code"], "UNAVAILABLE");
}

#[tokio::test]
async fn malformed_result_is_an_extraction_failure() {
    let mut bad = oqtf_facts();
    bad.facts[0].confidence = 3.0;
    let (engine, _) = setup_engine(FakeGateway::returning(bad));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let err = engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::ExtractionFailed(ExtractionError::Malformed(_))));
    assert_eq!(engine.snapshot(&ctx, id).await.unwrap().state(), WorkspaceState::Received);
}

#[tokio::test]
async fn empty_extraction_does_not_transition() {
    let (engine, _) = setup_engine(FakeGateway::returning(empty_extraction()));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let outcome = engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();
    assert!(outcome.transition.is_none());
    assert_eq!(engine.snapshot(&ctx, id).await.unwrap().state(), WorkspaceState::Received);
}

#[tokio::test]
async fn validation_locks_until_the_validator_unlocks() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = ready_for_human(&engine, &ctx).await;

    assert!(matches!(
        engine.validate(&ctx, id, None).await,
        Err(EngineError::Forbidden(_))
    ));

    let validator = reviewer("t");
    let receipt = engine
        .transition(&validator, id, WorkspaceState::Validated, "deadline confirmed")
        .await
        .unwrap();
    assert_eq!(receipt.to_state, WorkspaceState::Validated);

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert!(snapshot.workspace.locked);
    assert_eq!(snapshot.workspace.validated_by.as_deref(), Some("reviewer-1"));
    assert_eq!(snapshot.workspace.validation_note.as_deref(), Some("deadline confirmed"));

    assert!(matches!(
        engine.add_fact(&ctx, id, late_fact()).await,
        Err(EngineError::Immutable { .. })
    ));
    assert!(engine
        .transition(&validator, id, WorkspaceState::Closed, "done")
        .await
        .unwrap_err()
        .is_invalid_transition());

    let other = RequestContext::new("reviewer-2", TenantId::new("t"), Role::Reviewer);
    assert!(matches!(
        engine.unlock(&other, id, "mistake").await,
        Err(EngineError::Forbidden(_))
    ));
    engine.unlock(&validator, id, "closing the file").await.unwrap();

    engine.transition(&validator, id, WorkspaceState::Closed, "done").await.unwrap();
    let archived = engine.archive(&validator, id).await.unwrap();
    assert!(archived.archived_at.is_some());

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert!(snapshot.workspace.is_archived());
    assert_eq!(snapshot.facts.len(), oqtf_facts().facts.len());
    assert!(matches!(
        engine.evaluate_risk(
            &ctx,
            id,
            NewRisk {
                description: "late".into(),
                probability: RiskLevel::Low,
                impact: RiskLevel::Low,
                irreversible: false,
            }
        )
        .await,
        Err(EngineError::Immutable { .. })
    ));
    assert!(engine.verify_chain(&ctx).await.is_ok());
}

#[tokio::test]
async fn only_closed_workspaces_are_archived() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = reviewer("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;
    assert!(matches!(engine.archive(&ctx, id).await, Err(EngineError::InvalidInput(_))));
}

#[tokio::test]
async fn human_records_are_scored_and_audited() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_full()));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;
    engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();

    let risk = engine
        .evaluate_risk(
            &ctx,
            id,
            NewRisk {
                description: "Appeal deadline missed".into(),
                probability: RiskLevel::Medium,
                impact: RiskLevel::High,
                irreversible: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(risk.risk_score, 6);

    engine
        .propose_action(
            &ctx,
            id,
            NewAction {
                action_type: "FILE_APPEAL".into(),
                description: "Draft the appeal".into(),
                rationale: "Deadline on 2026-04-01".into(),
            },
        )
        .await
        .unwrap();

    engine.transition(&ctx, id, WorkspaceState::RiskEvaluated, "risk reviewed").await.unwrap();
    engine.transition(&ctx, id, WorkspaceState::ActionProposed, "action drafted").await.unwrap();

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert!((snapshot.workspace.reasoning_quality - 1.0).abs() < 1e-9);

    let risks = engine
        .audit_trail(&ctx, TrailFilter { event_type: Some(EventType::RiskEvaluated), ..TrailFilter::default() })
        .await
        .unwrap();
    assert_eq!(risks.items[0].metadata["riskScore"], 6);
}

#[tokio::test]
async fn full_analysis_policy_is_enforced() {
    let config = EngineConfig::default().with_full_analysis(true);
    let (engine, _) = setup_engine_with(config, FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;
    engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();

    match engine.transition(&ctx, id, WorkspaceState::ReadyForHuman, "ready").await {
        Err(EngineError::InvalidStateTransition { violations, .. }) => assert_eq!(violations.len(), 3),
        other => panic!("expected InvalidStateTransition, got {other:?}"),
    }

    // An open blocker is reported alongside the missing analysis, not instead of it.
    let element = engine.add_missing_element(&ctx, id, blocking_document()).await.unwrap();
    match engine.transition(&ctx, id, WorkspaceState::ReadyForHuman, "ready").await {
        Err(EngineError::InvalidStateTransition { violations, .. }) => {
            assert_eq!(violations.len(), 4);
            assert!(violations
                .iter()
                .any(|v| v.entity.entity_id == element.id.to_string()));
        }
        other => panic!("expected InvalidStateTransition, got {other:?}"),
    }
}

fn late_fact() -> NewFact {
    NewFact {
        label: "late".into(),
        value: "x".into(),
        source: FactSource::Human,
        source_ref: None,
        confidence: 1.0,
    }
}

#[tokio::test]
async fn closed_workspace_takes_no_new_records() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;
    engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();
    engine.transition(&ctx, id, WorkspaceState::Closed, "withdrawn").await.unwrap();

    let before = chain_len(&engine, &ctx).await;
    assert!(matches!(
        engine.add_missing_element(&ctx, id, blocking_document()).await,
        Err(EngineError::Immutable { .. })
    ));
    assert!(matches!(
        engine.add_fact(&ctx, id, late_fact()).await,
        Err(EngineError::Immutable { .. })
    ));
    let action = NewAction {
        action_type: "appeal".into(),
        description: "File an appeal".into(),
        rationale: String::new(),
    };
    assert!(matches!(
        engine.propose_action(&ctx, id, action).await,
        Err(EngineError::Immutable { .. })
    ));

    let other = engine
        .receive(&ctx, InboundMessage::new(SourceType::Email, "another notice"))
        .await
        .unwrap()
        .workspace
        .id;
    assert!(matches!(
        engine.confirm_link(&reviewer("t"), id, other).await,
        Err(EngineError::Immutable { .. })
    ));

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert!(snapshot.missing_elements.is_empty());
    assert_eq!(snapshot.facts.len(), oqtf_facts().facts.len());
    assert_eq!(chain_len(&engine, &ctx).await, before + 1);
}

#[tokio::test]
async fn unlocked_validated_workspace_stays_frozen_until_closed() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let validator = reviewer("t");
    let id = ready_for_human(&engine, &ctx).await;
    engine.validate(&validator, id, None).await.unwrap();
    engine.unlock(&validator, id, "closing the file").await.unwrap();

    match engine.add_fact(&ctx, id, late_fact()).await {
        Err(EngineError::Immutable { reason, .. }) => assert_eq!(reason, "workspace is validated"),
        other => panic!("expected Immutable, got {other:?}"),
    }
    assert!(matches!(
        engine.add_missing_element(&ctx, id, blocking_document()).await,
        Err(EngineError::Immutable { .. })
    ));

    engine.transition(&validator, id, WorkspaceState::Closed, "done").await.unwrap();
    assert_eq!(engine.snapshot(&ctx, id).await.unwrap().state(), WorkspaceState::Closed);
}

#[tokio::test]
async fn configured_page_ceiling_governs_the_trail() {
    let config = EngineConfig {
        max_page_limit: 1_000,
        ..EngineConfig::default()
    };
    let (engine, _) = setup_engine_with(config, FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    for n in 0..600 {
        engine
            .receive(&ctx, InboundMessage::new(SourceType::Email, format!("notice {n}")))
            .await
            .unwrap();
    }

    let trail = engine
        .audit_trail(&ctx, TrailFilter { limit: Some(600), ..TrailFilter::default() })
        .await
        .unwrap();
    assert_eq!((trail.items.len(), trail.limit, trail.total), (600, 600, 600));
    assert!(!trail.has_more);

    let capped = engine
        .audit_trail(&ctx, TrailFilter { limit: Some(5_000), ..TrailFilter::default() })
        .await
        .unwrap();
    assert_eq!(capped.limit, 1_000);
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let owner = member("a");
    let intruder = member("b");
    let id = engine.receive(&owner, oqtf_message()).await.unwrap().workspace.id;

    assert!(matches!(engine.snapshot(&intruder, id).await, Err(EngineError::Forbidden(_))));
    assert!(matches!(
        engine.extract(&intruder, id, ExtractOptions::default()).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine.snapshot(&owner, WorkspaceId::new()).await,
        Err(EngineError::NotFound { .. })
    ));

    let trail = engine.audit_trail(&intruder, TrailFilter::default()).await.unwrap();
    assert_eq!(trail.total, 0);
    assert!(engine.triage_queue(&intruder).await.unwrap().is_empty());
}

#[tokio::test]
async fn viewers_are_read_only() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let id = engine.receive(&member("t"), oqtf_message()).await.unwrap().workspace.id;
    let ctx = viewer("t");

    assert!(engine.snapshot(&ctx, id).await.is_ok());
    assert!(matches!(engine.receive(&ctx, oqtf_message()).await, Err(EngineError::Forbidden(_))));
    assert!(matches!(
        engine.add_missing_element(&ctx, id, blocking_document()).await,
        Err(EngineError::Forbidden(_))
    ));
}

#[tokio::test]
async fn duplicates_are_proposed_then_linked_by_a_reviewer() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let first = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace;

    let reformatted = InboundMessage::new(SourceType::Email, format!("  {}  ", casework_test_utils::OQTF_NOTICE.to_uppercase()))
        .with_sender("someone-else@example.org");
    let second = engine.receive(&ctx, reformatted).await.unwrap();
    assert_eq!(second.duplicates.len(), 1);
    assert_eq!(second.duplicates[0].workspace_id, first.id);
    assert_eq!(second.duplicates[0].reason, MatchReason::ExactHashMatch);
    assert_eq!(second.workspace.duplicate_of, None);

    let proposals = engine
        .audit_trail(&ctx, TrailFilter { event_type: Some(EventType::DuplicateDetected), ..TrailFilter::default() })
        .await
        .unwrap();
    assert_eq!(proposals.total, 1);
    assert_eq!(proposals.items[0].metadata["status"], "PROPOSED_FOR_LINKING");
    assert_eq!(proposals.items[0].metadata["actionRequired"], true);

    let second_id = second.workspace.id;
    assert!(matches!(
        engine.confirm_link(&ctx, second_id, first.id).await,
        Err(EngineError::Forbidden(_))
    ));
    let linked = engine.confirm_link(&reviewer("t"), second_id, first.id).await.unwrap();
    assert_eq!(linked.duplicate_of, Some(first.id));

    let links = engine
        .audit_trail(&ctx, TrailFilter { event_type: Some(EventType::DuplicateLinked), ..TrailFilter::default() })
        .await
        .unwrap();
    assert_eq!(links.total, 1);
}

#[tokio::test]
async fn exact_matches_outrank_sender_matches() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let original = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace;
    let follow_up = engine
        .receive(
            &ctx,
            InboundMessage::new(SourceType::Letter, "Complement au dossier OQTF")
                .with_sender("greffe@prefecture.example"),
        )
        .await
        .unwrap();
    // Same sender within the window, different content.
    assert_eq!(follow_up.duplicates.len(), 1);
    assert_eq!(follow_up.duplicates[0].reason, MatchReason::MetadataMatch);

    let third = engine.receive(&ctx, oqtf_message()).await.unwrap();
    let reasons: Vec<_> = third.duplicates.iter().map(|c| (c.workspace_id, c.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            (original.id, MatchReason::ExactHashMatch),
            (follow_up.workspace.id, MatchReason::MetadataMatch),
        ]
    );
}

#[tokio::test]
async fn triage_queue_orders_by_quality() {
    let (engine, _) = setup_engine(
        FakeGateway::returning(oqtf_facts()).then(FakeReply::Result(oqtf_full())),
    );
    let ctx = member("t");
    let full = ready_for_human(&engine, &ctx).await;
    let facts_only = ready_for_human(&engine, &ctx).await;

    let queue: Vec<_> = engine.triage_queue(&ctx).await.unwrap().into_iter().map(|w| w.id).collect();
    assert_eq!(queue, vec![full, facts_only]);
}

#[tokio::test]
async fn timeline_follows_one_workspace() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = ready_for_human(&engine, &ctx).await;

    let page = engine
        .audit_timeline(&ctx, casework_audit::EntityType::Workspace, &id.to_string(), None, 0)
        .await
        .unwrap();
    let types: Vec<_> = page.items.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::WorkspaceCreated,
            EventType::FactsExtracted,
            EventType::StateTransition,
            EventType::StateTransition,
        ]
    );
}
