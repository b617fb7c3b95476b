//! Workspace exclusivity, cancellation and audit outbox recovery

use casework_audit::{EventStore, EventType};
use casework_core::prelude::*;
use casework_core::{MissingElementKind, NewMissingElement};
use casework_test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

#[tokio::test]
async fn concurrent_extract_yields_exactly_one_workspace_locked() {
    let (engine, gateway) =
        setup_engine(FakeGateway::returning(oqtf_facts()).with_delay(Duration::from_millis(50)));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let (a, b) = tokio::join!(
        engine.extract(&ctx, id, ExtractOptions::default()),
        engine.extract(&ctx, id, ExtractOptions::default()),
    );
    let results = [a, b];
    let locked = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::WorkspaceLocked { .. })))
        .count();
    assert_eq!(locked, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(gateway.calls(), 1);
    assert!(!engine.locks().is_held(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_tasks_on_one_workspace_are_refused() {
    let (engine, gateway) =
        setup_engine(FakeGateway::returning(oqtf_facts()).with_delay(Duration::from_millis(500)));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let barrier = Arc::new(Barrier::new(8));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let ctx = ctx.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.extract(&ctx, id, ExtractOptions::default()).await
        }));
    }

    let mut ok = 0;
    let mut locked = 0;
    for joined in futures::future::join_all(handles).await {
        match joined.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::WorkspaceLocked { .. }) => locked += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((ok, locked), (1, 7));
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_workspaces_run_in_parallel() {
    let (engine, _) =
        setup_engine(FakeGateway::returning(oqtf_facts()).with_delay(Duration::from_millis(20)));
    let ctx = member("t");
    let mut ids = Vec::new();
    for n in 0..6 {
        let message = InboundMessage::new(SourceType::Email, format!("notice number {n}"));
        ids.push(engine.receive(&ctx, message).await.unwrap().workspace.id);
    }

    let handles: Vec<_> = ids
        .iter()
        .map(|&id| {
            let engine = engine.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { engine.extract(&ctx, id, ExtractOptions::default()).await })
        })
        .collect();
    for joined in futures::future::join_all(handles).await {
        assert!(joined.unwrap().is_ok());
    }
    assert!(engine.verify_chain(&ctx).await.is_ok());
}

#[tokio::test]
async fn cancelled_extraction_releases_the_workspace() {
    let (engine, _) = setup_engine(FakeGateway::hanging());
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        engine.extract(&ctx, id, ExtractOptions::default()),
    )
    .await;
    assert!(cancelled.is_err());
    assert!(!engine.locks().is_held(id));

    let snapshot = engine.snapshot(&ctx, id).await.unwrap();
    assert_eq!(snapshot.state(), WorkspaceState::Received);
    assert!(snapshot.facts.is_empty());

    let element = NewMissingElement {
        kind: MissingElementKind::Information,
        description: "Date of birth".into(),
        why: "Needed for the appeal form".into(),
        blocking: false,
    };
    assert!(engine.add_missing_element(&ctx, id, element).await.is_ok());
}

#[tokio::test]
async fn gateway_timeout_is_an_extraction_failure() {
    let config = EngineConfig::default().with_extraction_timeout(Duration::from_millis(20));
    let (engine, _) = setup_engine_with(config, FakeGateway::hanging());
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    match engine.extract(&ctx, id, ExtractOptions::default()).await {
        Err(EngineError::ExtractionFailed(casework_core::ExtractionError::Timeout { after_ms })) => {
            assert_eq!(after_ms, 20);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!engine.locks().is_held(id));
    assert_eq!(engine.snapshot(&ctx, id).await.unwrap().state(), WorkspaceState::Received);
}

#[tokio::test]
async fn undelivered_audit_intents_are_recovered() {
    let (engine, store, events) = setup_flaky_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");

    events.set_down(true);
    let intake = engine.receive(&ctx, oqtf_message()).await.unwrap();
    assert!(intake.events.is_empty());
    let outcome = engine
        .extract(&ctx, intake.workspace.id, ExtractOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.transition.unwrap().event_id, None);

    // The state change is committed even though the chain is unreachable.
    let snapshot = engine.snapshot(&ctx, intake.workspace.id).await.unwrap();
    assert_eq!(snapshot.state(), WorkspaceState::FactsExtracted);
    assert_eq!(store.outbox_len(), 3);
    assert_eq!(engine.verify_chain(&ctx).await.unwrap().events_checked, 0);

    events.set_down(false);
    let report = engine.recover_outbox().await.unwrap();
    assert_eq!((report.delivered, report.remaining), (3, 0));
    assert_eq!(store.outbox_len(), 0);
    assert_eq!(engine.verify_chain(&ctx).await.unwrap().events_checked, 3);

    let again = engine.recover_outbox().await.unwrap();
    assert_eq!(again.delivered, 0);
}

#[tokio::test]
async fn deferred_intents_are_chained_before_the_next_commit() {
    let (engine, store, events) = setup_flaky_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = engine.receive(&ctx, oqtf_message()).await.unwrap().workspace.id;

    events.set_down(true);
    engine.extract(&ctx, id, ExtractOptions::default()).await.unwrap();
    assert_eq!(store.outbox_len(), 2);
    events.set_down(false);

    // No recovery pass in between: the next commit drains the backlog first.
    let receipt = engine
        .transition(&ctx, id, WorkspaceState::ReadyForHuman, "ready")
        .await
        .unwrap();
    assert!(receipt.event_id.is_some());
    assert_eq!(store.outbox_len(), 0);

    let chain = events.chain(&ctx.tenant_id).await.unwrap();
    let order: Vec<(EventType, Option<serde_json::Value>)> = chain
        .iter()
        .map(|e| (e.event_type, e.metadata.get("toState").cloned()))
        .collect();
    assert_eq!(
        order,
        vec![
            (EventType::WorkspaceCreated, None),
            (EventType::FactsExtracted, None),
            (EventType::StateTransition, Some(serde_json::json!("FACTS_EXTRACTED"))),
            (EventType::StateTransition, Some(serde_json::json!("READY_FOR_HUMAN"))),
        ]
    );
    assert_eq!(chain.last().map(|e| e.id), receipt.event_id);
    assert_eq!(engine.verify_chain(&ctx).await.unwrap().events_checked, 4);
}

#[tokio::test]
async fn backlog_of_one_tenant_is_left_to_its_own_commits() {
    let (engine, store, events) = setup_flaky_engine(FakeGateway::returning(oqtf_facts()));
    let a = member("tenant-a");
    let b = member("tenant-b");

    events.set_down(true);
    engine.receive(&a, oqtf_message()).await.unwrap();
    events.set_down(false);

    let intake = engine.receive(&b, oqtf_message()).await.unwrap();
    assert_eq!(intake.events.len(), 1);
    assert_eq!(store.outbox_len(), 1);
    assert_eq!(engine.verify_chain(&a).await.unwrap().events_checked, 0);

    engine.receive(&a, InboundMessage::new(SourceType::Email, "second notice")).await.unwrap();
    assert_eq!(store.outbox_len(), 0);
    assert_eq!(engine.verify_chain(&a).await.unwrap().events_checked, 2);
}
