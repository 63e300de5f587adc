use actix_web::{web, HttpRequest, HttpResponse, Responder};
use tracing::info;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::auth::ClaimsExt;
use crate::http::player_handler::LimitQuery;
use crate::http::AppState;
use crate::models::{ResolveMatchDTO, SubmitMatchDTO};

fn caller(req: &HttpRequest) -> Result<Uuid, ApiError> {
    req.player_id()
        .ok_or_else(|| ApiError::unauthorized("Sign in as a player first"))
}

// =============================================================================
// SUBMIT MATCH
// =============================================================================

/// POST /api/matches
/// Report a match on behalf of the signed-in player
pub async fn submit_match(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    req: web::Json<SubmitMatchDTO>,
) -> Result<impl Responder, ApiError> {
    let submitted_by = caller(&http_req)?;
    info!(submitted_by = %submitted_by, "Received submit match request");

    let created = state
        .match_service
        .submit(req.into_inner(), submitted_by)
        .await?;

    Ok(HttpResponse::Created().json(created))
}

// =============================================================================
// RESOLVE MATCH
// =============================================================================

/// POST /api/matches/:id/resolve
/// Confirm or reject a pending match as an opponent of the submitter
pub async fn resolve_match(
    state: web::Data<AppState>,
    http_req: HttpRequest,
    path: web::Path<Uuid>,
    req: web::Json<ResolveMatchDTO>,
) -> Result<impl Responder, ApiError> {
    let actor = caller(&http_req)?;
    let match_id = path.into_inner();
    info!(
        match_id = %match_id,
        actor = %actor,
        decision = ?req.decision,
        "Received resolve request"
    );

    let resolution = state
        .match_service
        .resolve(match_id, actor, req.decision)
        .await?;

    Ok(HttpResponse::Ok().json(resolution))
}

// =============================================================================
// QUERIES
// =============================================================================

/// GET /api/matches/:id
pub async fn get_match(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    let detail = state.match_service.get_match(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

/// GET /api/matches/pending?limit=
pub async fn list_pending(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<impl Responder, ApiError> {
    let pending = state.match_service.list_pending(query.limit).await?;
    Ok(HttpResponse::Ok().json(pending))
}
