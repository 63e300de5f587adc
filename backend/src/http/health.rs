use actix_web::{web, HttpResponse, Result};

use crate::api_error::ApiError;
use crate::http::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state.store.health_check().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "store": "ok"
    })))
}
