//! Route handlers driven directly with extractor values

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use casework_core::prelude::*;
use casework_core::{MissingElementKind, NewMissingElement};
use casework_server::routes::{self, Caller, PageParams, ResolveBody, TrailParams, TransitionBody};
use casework_test_utils::*;
use pretty_assertions::assert_eq;

fn blocking_document() -> NewMissingElement {
    NewMissingElement {
        kind: MissingElementKind::Document,
        description: "Signed copy of the decision".into(),
        why: "The appeal deadline depends on it".into(),
        blocking: true,
    }
}

async fn received(engine: &ReasoningEngine, ctx: &RequestContext) -> WorkspaceId {
    let (status, Json(outcome)) = routes::receive(State(engine.clone()), Caller(ctx.clone()), Json(oqtf_message()))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    outcome.workspace.id
}

#[tokio::test]
async fn blocked_transition_is_422_until_resolved() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("prefecture-lyon");
    let id = received(&engine, &ctx).await;

    let Json(outcome) = routes::extract(State(engine.clone()), Caller(ctx.clone()), Path(id), None)
        .await
        .unwrap();
    assert_eq!(outcome.transition.unwrap().to_state, WorkspaceState::FactsExtracted);

    let (_, Json(element)) = routes::add_missing_element(
        State(engine.clone()),
        Caller(ctx.clone()),
        Path(id),
        Json(blocking_document()),
    )
    .await
    .unwrap();

    let to_ready = || TransitionBody {
        to_state: WorkspaceState::ReadyForHuman,
        reason: "analysis complete".into(),
    };
    let err = routes::transition(State(engine.clone()), Caller(ctx.clone()), Path(id), Json(to_ready()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err.code(), "BLOCKING_ELEMENTS_PRESENT");

    routes::resolve_missing_element(
        State(engine.clone()),
        Caller(ctx.clone()),
        Path((id, element.id)),
        Json(ResolveBody {
            resolution: "Received by mail".into(),
        }),
    )
    .await
    .unwrap();

    let Json(receipt) = routes::transition(State(engine.clone()), Caller(ctx.clone()), Path(id), Json(to_ready()))
        .await
        .unwrap();
    assert_eq!(receipt.to_state, WorkspaceState::ReadyForHuman);

    let Json(queue) = routes::triage(State(engine.clone()), Caller(ctx.clone())).await.unwrap();
    assert_eq!(queue.iter().map(|w| w.id).collect::<Vec<_>>(), vec![id]);
}

#[tokio::test]
async fn trail_is_paginated_and_filtered() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = received(&engine, &ctx).await;
    routes::extract(State(engine.clone()), Caller(ctx.clone()), Path(id), None)
        .await
        .unwrap();

    let params = TrailParams {
        limit: Some(2),
        ..TrailParams::default()
    };
    let Json(page) = routes::audit_trail(State(engine.clone()), Caller(ctx.clone()), Query(params))
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 3);
    assert_eq!(page.trail.len(), 2);
    assert!(page.pagination.has_more);

    let params = TrailParams {
        event_type: Some("state_transition".into()),
        ..TrailParams::default()
    };
    let Json(transitions) = routes::audit_trail(State(engine.clone()), Caller(ctx.clone()), Query(params))
        .await
        .unwrap();
    assert_eq!(transitions.pagination.total, 1);

    let today = chrono::Utc::now().date_naive();
    let params = TrailParams {
        start_date: Some(today.to_string()),
        end_date: Some(today.to_string()),
        ..TrailParams::default()
    };
    let Json(same_day) = routes::audit_trail(State(engine.clone()), Caller(ctx.clone()), Query(params))
        .await
        .unwrap();
    assert_eq!(same_day.pagination.total, 3);

    let params = TrailParams {
        end_date: Some(today.pred_opt().unwrap().to_string()),
        ..TrailParams::default()
    };
    let Json(earlier) = routes::audit_trail(State(engine.clone()), Caller(ctx.clone()), Query(params))
        .await
        .unwrap();
    assert_eq!(earlier.pagination.total, 0);

    let params = TrailParams {
        start_date: Some("yesterday".into()),
        ..TrailParams::default()
    };
    let err = routes::audit_trail(State(engine.clone()), Caller(ctx.clone()), Query(params))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let params = TrailParams {
        event_type: Some("NOT_AN_EVENT".into()),
        ..TrailParams::default()
    };
    let err = routes::audit_trail(State(engine.clone()), Caller(ctx.clone()), Query(params))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn timeline_and_verify_cover_one_workspace() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let ctx = member("t");
    let id = received(&engine, &ctx).await;

    let Json(timeline) = routes::audit_timeline(
        State(engine.clone()),
        Caller(ctx.clone()),
        Path(("workspace".to_string(), id.to_string())),
        Query(PageParams::default()),
    )
    .await
    .unwrap();
    assert_eq!(timeline.pagination.total, 1);
    assert_eq!(timeline.trail[0].event_type, casework_audit::EventType::WorkspaceCreated);

    let Json(report) = routes::verify_chain(State(engine.clone()), Caller(ctx.clone())).await.unwrap();
    assert_eq!(report["valid"], true);
    assert_eq!(report["eventsChecked"], 1);
}

#[tokio::test]
async fn foreign_tenant_gets_403_and_unknown_id_404() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let id = received(&engine, &member("owner")).await;

    let err = routes::snapshot(State(engine.clone()), Caller(member("intruder")), Path(id))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    let err = routes::snapshot(State(engine.clone()), Caller(member("owner")), Path(WorkspaceId::new()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_failure_is_502() {
    let (engine, _) = setup_engine(FakeGateway::failing(casework_core::ExtractionError::Unavailable(
        "connection reset".into(),
    )));
    let ctx = member("t");
    let id = received(&engine, &ctx).await;

    let err = routes::extract(State(engine.clone()), Caller(ctx.clone()), Path(id), None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn viewer_cannot_create_workspaces() {
    let (engine, _) = setup_engine(FakeGateway::returning(oqtf_facts()));
    let err = routes::receive(State(engine), Caller(viewer("t")), Json(oqtf_message()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}
