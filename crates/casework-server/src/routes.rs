//! HTTP routes
//!
//! Handlers are thin: resolve the caller from headers, parse the request,
//! call one engine operation and serialize the result. The engine itself
//! enforces tenant ownership on every call.

use crate::error::ApiError;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use casework_audit::{AuditEvent, EntityType, EventType, Page, TenantId};
use casework_core::{
    DuplicateCandidate, ExtractOptions, ExtractionOutcome, Fact, InboundMessage, IntakeOutcome,
    MissingElement, MissingElementId, NewAction, NewFact, NewMissingElement, NewRisk,
    ProposedAction, ReasoningEngine, RequestContext, Risk, Role, TrailFilter, TransitionReceipt,
    WorkspaceFilter, WorkspaceId, WorkspaceReasoning, WorkspaceSnapshot, WorkspaceState,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const USER_HEADER: &str = "x-user-id";
pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ROLE_HEADER: &str = "x-role";

pub fn router(engine: ReasoningEngine) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/workspaces", post(receive).get(list))
        .route("/workspaces/triage", get(triage))
        .route("/workspaces/:id", get(snapshot))
        .route("/workspaces/:id/duplicates", get(duplicates))
        .route("/workspaces/:id/link", post(link))
        .route("/workspaces/:id/extract", post(extract))
        .route("/workspaces/:id/transition", post(transition))
        .route("/workspaces/:id/validate", post(validate))
        .route("/workspaces/:id/unlock", post(unlock))
        .route("/workspaces/:id/archive", post(archive))
        .route("/workspaces/:id/facts", post(add_fact))
        .route("/workspaces/:id/missing-elements", post(add_missing_element))
        .route(
            "/workspaces/:id/missing-elements/:element_id/resolve",
            post(resolve_missing_element),
        )
        .route("/workspaces/:id/risks", post(evaluate_risk))
        .route("/workspaces/:id/actions", post(propose_action))
        .route("/audit/trail", get(audit_trail))
        .route("/audit/timeline/:entity_type/:entity_id", get(audit_timeline))
        .route("/audit/verify", get(verify_chain))
        .with_state(engine)
}

/// Caller identity taken from the `x-user-id`, `x-tenant-id` and `x-role` headers
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity(&parts.headers).map(Caller)
    }
}

/// Missing role defaults to `member`
///
/// # Errors
/// `Unauthenticated` when user or tenant is absent or the role is unknown.
pub fn identity(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let user = header(USER_HEADER).ok_or_else(|| ApiError::Unauthenticated(format!("{USER_HEADER} is required")))?;
    let tenant =
        header(TENANT_HEADER).ok_or_else(|| ApiError::Unauthenticated(format!("{TENANT_HEADER} is required")))?;
    let role = match header(ROLE_HEADER) {
        Some(raw) => raw.parse::<Role>().map_err(ApiError::Unauthenticated)?,
        None => Role::Member,
    };
    Ok(RequestContext::new(user, TenantId::new(tenant), role))
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "version": casework_core::VERSION }))
}

pub async fn receive(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Json(message): Json<InboundMessage>,
) -> Result<(StatusCode, Json<IntakeOutcome>), ApiError> {
    let outcome = engine.receive(&ctx, message).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub state: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

pub async fn list(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<WorkspaceReasoning>> {
    let state = params
        .state
        .as_deref()
        .map(str::parse::<WorkspaceState>)
        .transpose()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let filter = WorkspaceFilter {
        state,
        include_archived: params.include_archived,
    };
    Ok(Json(engine.list(&ctx, &filter).await?))
}

pub async fn triage(State(engine): State<ReasoningEngine>, Caller(ctx): Caller) -> ApiResult<Vec<WorkspaceReasoning>> {
    Ok(Json(engine.triage_queue(&ctx).await?))
}

pub async fn snapshot(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
) -> ApiResult<WorkspaceSnapshot> {
    Ok(Json(engine.snapshot(&ctx, id).await?))
}

pub async fn duplicates(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
) -> ApiResult<Vec<DuplicateCandidate>> {
    Ok(Json(engine.find_duplicates(&ctx, id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkBody {
    pub original_id: WorkspaceId,
    /// Record a proposal instead of linking
    #[serde(default)]
    pub propose_only: bool,
}

pub async fn link(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    Json(body): Json<LinkBody>,
) -> ApiResult<Value> {
    if body.propose_only {
        let event = engine.propose_link(&ctx, id, body.original_id).await?;
        return Ok(Json(json!({ "proposed": true, "event": event })));
    }
    let workspace = engine.confirm_link(&ctx, id, body.original_id).await?;
    Ok(Json(json!({ "proposed": false, "workspace": workspace })))
}

pub async fn extract(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    body: Option<Json<ExtractOptions>>,
) -> ApiResult<ExtractionOutcome> {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    Ok(Json(engine.extract(&ctx, id, options).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionBody {
    pub to_state: WorkspaceState,
    pub reason: String,
}

pub async fn transition(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    Json(body): Json<TransitionBody>,
) -> ApiResult<TransitionReceipt> {
    Ok(Json(engine.transition(&ctx, id, body.to_state, &body.reason).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateBody {
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn validate(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    body: Option<Json<ValidateBody>>,
) -> ApiResult<TransitionReceipt> {
    let note = body.and_then(|Json(b)| b.note);
    Ok(Json(engine.validate(&ctx, id, note).await?))
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub reason: String,
}

pub async fn unlock(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<WorkspaceReasoning> {
    Ok(Json(engine.unlock(&ctx, id, &body.reason).await?))
}

pub async fn archive(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
) -> ApiResult<WorkspaceReasoning> {
    Ok(Json(engine.archive(&ctx, id).await?))
}

pub async fn add_fact(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    Json(body): Json<NewFact>,
) -> Result<(StatusCode, Json<Fact>), ApiError> {
    Ok((StatusCode::CREATED, Json(engine.add_fact(&ctx, id, body).await?)))
}

pub async fn add_missing_element(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    Json(body): Json<NewMissingElement>,
) -> Result<(StatusCode, Json<MissingElement>), ApiError> {
    Ok((StatusCode::CREATED, Json(engine.add_missing_element(&ctx, id, body).await?)))
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub resolution: String,
}

pub async fn resolve_missing_element(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path((id, element_id)): Path<(WorkspaceId, MissingElementId)>,
    Json(body): Json<ResolveBody>,
) -> ApiResult<MissingElement> {
    Ok(Json(
        engine
            .resolve_missing_element(&ctx, id, element_id, &body.resolution)
            .await?,
    ))
}

pub async fn evaluate_risk(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    Json(body): Json<NewRisk>,
) -> Result<(StatusCode, Json<Risk>), ApiError> {
    Ok((StatusCode::CREATED, Json(engine.evaluate_risk(&ctx, id, body).await?)))
}

pub async fn propose_action(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path(id): Path<WorkspaceId>,
    Json(body): Json<NewAction>,
) -> Result<(StatusCode, Json<ProposedAction>), ApiError> {
    Ok((StatusCode::CREATED, Json(engine.propose_action(&ctx, id, body).await?)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailParams {
    pub event_type: Option<String>,
    pub actor_id: Option<String>,
    /// RFC 3339 instant, or a `YYYY-MM-DD` day taken from its first instant
    pub start_date: Option<String>,
    /// RFC 3339 instant, or a `YYYY-MM-DD` day taken through its last instant
    pub end_date: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl<T> From<&Page<T>> for Pagination {
    fn from(page: &Page<T>) -> Self {
        Self {
            total: page.total,
            limit: page.limit,
            offset: page.offset,
            has_more: page.has_more,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrailResponse {
    pub trail: Vec<AuditEvent>,
    pub pagination: Pagination,
}

impl From<Page<AuditEvent>> for TrailResponse {
    fn from(page: Page<AuditEvent>) -> Self {
        let pagination = Pagination::from(&page);
        Self {
            trail: page.items,
            pagination,
        }
    }
}

pub async fn audit_trail(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Query(params): Query<TrailParams>,
) -> ApiResult<TrailResponse> {
    let event_type = params
        .event_type
        .as_deref()
        .map(str::parse::<EventType>)
        .transpose()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let filter = TrailFilter {
        event_type,
        actor_id: params.actor_id,
        start: date_bound("startDate", params.start_date.as_deref(), false)?,
        end: date_bound("endDate", params.end_date.as_deref(), true)?,
        limit: params.limit,
        offset: params.offset,
    };
    Ok(Json(engine.audit_trail(&ctx, filter).await?.into()))
}

fn date_bound(field: &str, raw: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("{field} must be an RFC 3339 timestamp or YYYY-MM-DD, got {raw:?}")))?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    Ok(time.map(|t| Utc.from_utc_datetime(&day.and_time(t))))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

pub async fn audit_timeline(
    State(engine): State<ReasoningEngine>,
    Caller(ctx): Caller,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Query(params): Query<PageParams>,
) -> ApiResult<TrailResponse> {
    let entity_type: EntityType = entity_type
        .parse()
        .map_err(|err: casework_audit::AuditError| ApiError::BadRequest(err.to_string()))?;
    let page = engine
        .audit_timeline(&ctx, entity_type, &entity_id, params.limit, params.offset)
        .await?;
    Ok(Json(page.into()))
}

pub async fn verify_chain(State(engine): State<ReasoningEngine>, Caller(ctx): Caller) -> ApiResult<Value> {
    let report = engine.verify_chain(&ctx).await?;
    Ok(Json(json!({
        "valid": true,
        "tenantId": report.tenant_id,
        "eventsChecked": report.events_checked,
        "head": report.head,
    })))
}
