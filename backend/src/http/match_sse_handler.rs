//! Server-sent events for clients that cannot hold a WebSocket.
//!
//! The stream opens with a `snapshot` event unless the client resumes from a
//! sequence still in the replay buffer. Every committed change follows as a
//! `delta` event whose `id` is its sequence, so a reconnecting `EventSource`
//! resumes through `Last-Event-ID`. A failed subscription ends the stream
//! with a `resync` event.

use crate::api_error::ApiError;
use crate::http::match_handler::AppState;
use crate::models::{MatchSnapshot, UpdateDelta};
use crate::service::sync_fault::SyncFault;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const LAST_EVENT_ID: &str = "Last-Event-ID";

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub since: Option<u64>,
}

fn frame(event: &str, id: Option<u64>, data: &impl Serialize) -> web::Bytes {
    let data = match serde_json::to_string(data) {
        Ok(json) => json,
        Err(e) => {
            error!(event, error = %e, "Failed to encode event");
            return web::Bytes::new();
        }
    };

    let mut out = format!("event: {}\n", event);
    if let Some(id) = id {
        out.push_str(&format!("id: {}\n", id));
    }
    out.push_str(&format!("data: {}\n\n", data));
    web::Bytes::from(out)
}

fn snapshot_frame(snapshot: &MatchSnapshot) -> web::Bytes {
    frame("snapshot", Some(snapshot.sequence), snapshot)
}

fn delta_frame(delta: &UpdateDelta) -> web::Bytes {
    frame("delta", Some(delta.sequence), delta)
}

fn resync_frame(fault: &SyncFault) -> web::Bytes {
    frame("resync", None, &json!({ "reason": fault.to_string() }))
}

/// Resume point from `?since=`, falling back to the `Last-Event-ID` header
fn resume_from(req: &HttpRequest, query: &EventsQuery) -> Option<u64> {
    query.since.or_else(|| {
        req.headers()
            .get(LAST_EVENT_ID)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

/// GET /api/matches/:id/events
pub async fn match_events(
    req: HttpRequest,
    path: web::Path<Uuid>,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let match_id = path.into_inner();
    let store = state.registry.get(match_id).await?;
    let channel = store.channel();
    let resume = resume_from(&req, &query);

    let resumed = resume
        .filter(|&sequence| sequence <= channel.latest_sequence())
        .and_then(|sequence| channel.subscribe(sequence).ok());

    let (opening, subscription) = match resumed {
        Some(subscription) => {
            debug!(match_id = %match_id, since = ?resume, "Resuming event stream");
            (None, subscription)
        }
        None => {
            let snapshot = store.snapshot().await;
            let subscription = channel.subscribe(snapshot.sequence)?;
            (Some(snapshot_frame(&snapshot)), subscription)
        }
    };
    info!(match_id = %match_id, "Event stream opened");

    let deltas = subscription.scan(false, |failed, item| {
        if *failed {
            return future::ready(None);
        }
        let bytes = match item {
            Ok(delta) => delta_frame(&delta),
            Err(fault) => {
                *failed = true;
                resync_frame(&fault)
            }
        };
        future::ready(Some(bytes))
    });

    let body = stream::iter(opening)
        .chain(deltas)
        .map(Ok::<_, Infallible>);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtConfig, JwtService};
    use crate::models::{CreateMatchDTO, MatchStatus, MatchTimer};
    use crate::service::journal::Journal;
    use crate::service::match_registry::MatchRegistry;
    use crate::service::update_channel::ChannelConfig;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;
    use actix_web::{test as actix_test, App};
    use std::sync::Arc;

    fn completed_match_state() -> web::Data<AppState> {
        web::Data::new(AppState {
            registry: Arc::new(MatchRegistry::new(
                Arc::new(Journal::in_memory()),
                ChannelConfig::default(),
            )),
            reorder_window: 64,
        })
    }

    async fn play_to_completion(state: &web::Data<AppState>) -> Uuid {
        let store = state
            .registry
            .create_match(CreateMatchDTO {
                best_of: 1,
                team1_name: "Alpha".to_string(),
                team2_name: "Bravo".to_string(),
                team1_players: vec![1],
                team2_players: vec![2],
                maps: vec![],
            })
            .await
            .unwrap();
        store.set_timer(60, true).await.unwrap();
        store.transition_status(MatchStatus::Live).await.unwrap();
        store
            .transition_status(MatchStatus::Completed)
            .await
            .unwrap();
        store.match_id()
    }

    async fn read_events(state: web::Data<AppState>, request: actix_test::TestRequest) -> String {
        let jwt = JwtService::new(JwtConfig::new(
            "test-secret-that-is-at-least-32-bytes",
            "livescore",
        ));
        let app = actix_test::init_service(
            App::new()
                .app_data(state)
                .configure(|cfg| crate::http::configure_routes(cfg, &jwt)),
        )
        .await;

        let response = actix_test::call_service(&app, request.to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        let body = to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn test_delta_frame_layout() {
        let delta = UpdateDelta {
            match_id: Uuid::nil(),
            sequence: 7,
            timestamp: chrono::Utc::now(),
            change: crate::models::DeltaChange::Timer {
                timer: MatchTimer {
                    elapsed_secs: 5,
                    running: false,
                },
            },
        };
        let text = String::from_utf8(delta_frame(&delta).to_vec()).unwrap();
        assert!(text.starts_with("event: delta\nid: 7\ndata: {"));
        assert!(text.ends_with("}\n\n"));
    }

    #[actix_web::test]
    async fn test_stream_opens_with_snapshot() {
        let state = completed_match_state();
        let id = play_to_completion(&state).await;

        let body = read_events(
            state,
            actix_test::TestRequest::get().uri(&format!("/api/matches/{}/events", id)),
        )
        .await;

        assert!(body.starts_with("event: snapshot\nid: 3\n"));
        assert!(!body.contains("event: delta"));
    }

    #[actix_web::test]
    async fn test_resume_replays_deltas_only() {
        let state = completed_match_state();
        let id = play_to_completion(&state).await;

        let body = read_events(
            state,
            actix_test::TestRequest::get().uri(&format!("/api/matches/{}/events?since=1", id)),
        )
        .await;

        assert!(!body.contains("event: snapshot"));
        assert_eq!(body.matches("event: delta").count(), 2);
        assert!(body.contains("id: 2\n"));
        assert!(body.contains("id: 3\n"));
    }

    #[actix_web::test]
    async fn test_last_event_id_header_resumes() {
        let state = completed_match_state();
        let id = play_to_completion(&state).await;

        let body = read_events(
            state,
            actix_test::TestRequest::get()
                .uri(&format!("/api/matches/{}/events", id))
                .insert_header((LAST_EVENT_ID, "2")),
        )
        .await;

        assert!(!body.contains("event: snapshot"));
        assert_eq!(body.matches("event: delta").count(), 1);
        assert!(body.contains("id: 3\n"));
    }

    #[actix_web::test]
    async fn test_resume_ahead_of_store_sends_snapshot() {
        let state = completed_match_state();
        let id = play_to_completion(&state).await;

        let body = read_events(
            state,
            actix_test::TestRequest::get().uri(&format!("/api/matches/{}/events?since=40", id)),
        )
        .await;

        assert!(body.starts_with("event: snapshot\n"));
    }
}
