use crate::api_error::ApiError;
use crate::http::match_handler::AppState;
use crate::service::journal::Journal;
use actix_web::{web, HttpResponse, Result};

/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let journal = state.registry.journal();
    if let Journal::Postgres(pg) = journal {
        crate::db::health_check(pg.pool()).await?;
    }

    let redis = match state.registry.relay() {
        Some(relay) => {
            relay
                .ping()
                .await
                .map_err(|e| ApiError::RedisError(e.to_string()))?;
            "ok"
        }
        None => "disabled",
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "journal": journal.backend(),
        "redis": redis,
        "live_matches": state.registry.live_matches().await.len(),
    })))
}
