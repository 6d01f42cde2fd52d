//! Real HTTP server on an ephemeral port, for transports that need a socket.

use super::match_handler::{configure_routes, AppState};
use crate::auth::{JwtConfig, JwtService};
use crate::models::CreateMatchDTO;
use crate::service::journal::Journal;
use crate::service::match_registry::MatchRegistry;
use crate::service::match_state_store::MatchStateStore;
use crate::service::update_channel::ChannelConfig;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;

/// Registry state with one fresh BO1 match
pub(crate) async fn served_match(
    config: ChannelConfig,
) -> (web::Data<AppState>, Arc<MatchStateStore>) {
    let state = web::Data::new(AppState {
        registry: Arc::new(MatchRegistry::new(Arc::new(Journal::in_memory()), config)),
        reorder_window: 64,
    });
    let store = state
        .registry
        .create_match(CreateMatchDTO {
            best_of: 1,
            team1_name: "Alpha".to_string(),
            team2_name: "Bravo".to_string(),
            team1_players: vec![1, 2],
            team2_players: vec![3, 4],
            maps: vec![],
        })
        .await
        .unwrap();
    (state, store)
}

/// Serve the match API from `state`, returning the base URL
pub(crate) fn spawn(state: web::Data<AppState>) -> String {
    let jwt = JwtService::new(JwtConfig::new(
        "test-secret-that-is-at-least-32-bytes",
        "livescore",
    ));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(|cfg| configure_routes(cfg, &jwt))
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", addr)
}
