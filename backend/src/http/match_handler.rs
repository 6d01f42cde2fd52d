use crate::api_error::ApiError;
use crate::auth::{AdminAuth, ClaimsExt, JwtService};
use crate::http::match_sse_handler::match_events;
use crate::models::*;
use crate::service::match_registry::MatchRegistry;
use crate::service::subscriber_view::{BroadcastOverlayView, MatchPageView, SubscriberView};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Application state shared by the match handlers
pub struct AppState {
    pub registry: Arc<MatchRegistry>,
    pub reorder_window: usize,
}

#[derive(Debug, Deserialize)]
pub struct MapPath {
    pub id: Uuid,
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct PlayerPath {
    pub id: Uuid,
    pub index: usize,
    pub player_id: PlayerId,
}

fn operator(req: &HttpRequest) -> String {
    req.claims().map(|claims| claims.sub).unwrap_or_default()
}

// =============================================================================
// CREATE / READ
// =============================================================================

/// POST /api/matches
pub async fn create_match(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateMatchDTO>,
) -> Result<impl Responder, ApiError> {
    body.validate()?;
    info!(
        operator = %operator(&req),
        team1 = %body.team1_name,
        team2 = %body.team2_name,
        best_of = body.best_of,
        "Received create match request"
    );

    let store = state.registry.create_match(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(store.snapshot().await))
}

/// GET /api/matches/:id
pub async fn get_match(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(store.snapshot().await))
}

/// GET /api/matches/:id/deltas?since=N
/// Backfill for pollers; 410 once the range has left the replay buffer
pub async fn get_deltas(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<DeltaQuery>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.into_inner()).await?;
    let channel = store.channel();
    let deltas = channel.deltas_since(query.since)?;

    Ok(HttpResponse::Ok().json(DeltaBatch {
        match_id: store.match_id(),
        latest_sequence: channel.latest_sequence(),
        deltas,
    }))
}

/// GET /api/matches/:id/page
pub async fn get_match_page(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.into_inner()).await?;
    let mut view = MatchPageView::new(state.reorder_window);
    view.on_snapshot(store.snapshot().await);
    Ok(HttpResponse::Ok().json(view.render()))
}

/// GET /api/matches/:id/overlay
pub async fn get_overlay(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.into_inner()).await?;
    let mut view = BroadcastOverlayView::new(state.reorder_window);
    view.on_snapshot(store.snapshot().await);
    Ok(HttpResponse::Ok().json(view.render()))
}

// =============================================================================
// ADMIN MUTATIONS
// =============================================================================

/// POST /api/matches/:id/status
pub async fn transition_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<MatchStatusDTO>,
) -> Result<impl Responder, ApiError> {
    let match_id = path.into_inner();
    info!(match_id = %match_id, operator = %operator(&req), to = ?body.status, "Match status change requested");

    let store = state.registry.get(match_id).await?;
    let delta = store.transition_status(body.status).await?;
    Ok(HttpResponse::Ok().json(delta))
}

/// POST /api/matches/:id/maps/:index/status
pub async fn transition_map_status(
    state: web::Data<AppState>,
    path: web::Path<MapPath>,
    body: web::Json<MapStatusDTO>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.id).await?;
    let delta = store
        .transition_map_status(path.index, body.status, body.winner)
        .await?;
    Ok(HttpResponse::Ok().json(delta))
}

/// POST /api/matches/:id/maps/:index/score
pub async fn increment_score(
    state: web::Data<AppState>,
    path: web::Path<MapPath>,
    body: web::Json<ScoreUpdateDTO>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.id).await?;
    let delta = store
        .apply_score_update(path.index, body.team1_delta, body.team2_delta)
        .await?;
    Ok(HttpResponse::Ok().json(delta))
}

/// PUT /api/matches/:id/maps/:index/score
pub async fn correct_score(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<MapPath>,
    body: web::Json<ScoreCorrectionDTO>,
) -> Result<impl Responder, ApiError> {
    info!(
        match_id = %path.id,
        map_index = path.index,
        operator = %operator(&req),
        "Score correction requested"
    );
    let store = state.registry.get(path.id).await?;
    let delta = store
        .correct_map_score(path.index, body.team1_score, body.team2_score)
        .await?;
    Ok(HttpResponse::Ok().json(delta))
}

/// POST /api/matches/:id/maps/:index/players/:player_id/stats
pub async fn update_player_stat(
    state: web::Data<AppState>,
    path: web::Path<PlayerPath>,
    body: web::Json<PlayerStatChange>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.id).await?;
    let delta = store
        .apply_player_stat_update(path.index, path.player_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(delta))
}

/// POST /api/matches/:id/timer
pub async fn set_timer(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<TimerDTO>,
) -> Result<impl Responder, ApiError> {
    let store = state.registry.get(path.into_inner()).await?;
    let delta = store.set_timer(body.elapsed_secs, body.running).await?;
    Ok(HttpResponse::Ok().json(delta))
}

/// POST /api/matches/:id/archive
pub async fn archive_match(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<impl Responder, ApiError> {
    let match_id = path.into_inner();
    info!(match_id = %match_id, operator = %operator(&req), "Archive requested");
    let snapshot = state.registry.archive(match_id).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Configure match routes. Reads are public; every write needs an admin token.
pub fn configure_routes(cfg: &mut web::ServiceConfig, jwt: &JwtService) {
    let admin = || AdminAuth::new(jwt.clone());

    cfg.service(
        web::scope("/api/matches")
            .service(
                web::resource("")
                    .wrap(admin())
                    .route(web::post().to(create_match)),
            )
            .route("/{id}", web::get().to(get_match))
            .route("/{id}/deltas", web::get().to(get_deltas))
            .route("/{id}/page", web::get().to(get_match_page))
            .route("/{id}/overlay", web::get().to(get_overlay))
            .route("/{id}/events", web::get().to(match_events))
            .service(
                web::resource("/{id}/status")
                    .wrap(admin())
                    .route(web::post().to(transition_status)),
            )
            .service(
                web::resource("/{id}/timer")
                    .wrap(admin())
                    .route(web::post().to(set_timer)),
            )
            .service(
                web::resource("/{id}/archive")
                    .wrap(admin())
                    .route(web::post().to(archive_match)),
            )
            .service(
                web::resource("/{id}/maps/{index}/status")
                    .wrap(admin())
                    .route(web::post().to(transition_map_status)),
            )
            .service(
                web::resource("/{id}/maps/{index}/score")
                    .wrap(admin())
                    .route(web::post().to(increment_score))
                    .route(web::put().to(correct_score)),
            )
            .service(
                web::resource("/{id}/maps/{index}/players/{player_id}/stats")
                    .wrap(admin())
                    .route(web::post().to(update_player_stat)),
            ),
    );
}
