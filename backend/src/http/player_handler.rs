use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::http::AppState;
use crate::models::{ClaimPlayerDTO, CreatePlayerDTO, CreatePlayerResponse, SignInDTO};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// GET /api/players/search?q=&limit=
pub async fn search_players(
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<impl Responder, ApiError> {
    let hits = state.claim_service.search(&query.q, query.limit).await?;
    Ok(HttpResponse::Ok().json(hits))
}

/// POST /api/players
/// Reserve a display name as an unclaimed player
pub async fn create_player(
    state: web::Data<AppState>,
    req: web::Json<CreatePlayerDTO>,
) -> Result<impl Responder, ApiError> {
    info!(display_name = %req.display_name, "Received create player request");

    let id = state.claim_service.create(req.into_inner()).await?;
    Ok(HttpResponse::Created().json(CreatePlayerResponse { id }))
}

/// GET /api/players/:id
pub async fn get_player(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    let player = state.claim_service.get_player(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(player))
}

/// POST /api/players/:id/claim
pub async fn claim_player(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<ClaimPlayerDTO>,
) -> Result<impl Responder, ApiError> {
    let player_id = path.into_inner();
    info!(player_id = %player_id, "Received claim request");

    state.claim_service.claim(player_id, &req.secret).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /api/players/:id/session
/// Sign in as a claimed player
pub async fn sign_in(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<SignInDTO>,
) -> Result<impl Responder, ApiError> {
    let session = state
        .claim_service
        .sign_in(path.into_inner(), &req.secret)
        .await?;
    Ok(HttpResponse::Ok().json(session))
}

/// GET /api/players/:id/history?limit=
pub async fn player_history(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<LimitQuery>,
) -> Result<impl Responder, ApiError> {
    let events = state
        .rating_service
        .history(path.into_inner(), query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(events))
}

/// GET /api/leaderboard?limit=
pub async fn leaderboard(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<impl Responder, ApiError> {
    let entries = state.rating_service.leaderboard(query.limit).await?;
    Ok(HttpResponse::Ok().json(entries))
}
