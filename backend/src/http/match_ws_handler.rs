use crate::http::match_handler::AppState;
use crate::models::{MatchSnapshot, UpdateDelta};
use crate::service::match_state_store::MatchStateStore;
use crate::service::sync_fault::SyncFault;
use actix::{
    fut::wrap_future, Actor, ActorContext, ActorFutureExt, AsyncContext, SpawnHandle,
    StreamHandler,
};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket message types
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Full state; replaces whatever the client holds
    Snapshot { snapshot: MatchSnapshot },
    /// One committed change
    Delta { delta: UpdateDelta },
    /// Client request: replay after `from_sequence`, or a fresh snapshot
    Resync {
        #[serde(default)]
        from_sequence: Option<u64>,
    },
    /// Error message
    Error { message: String },
    /// Ping/Pong for keepalive
    Ping,
    Pong,
}

/// One client following one match
pub struct MatchSession {
    id: Uuid,
    hb: Instant,
    store: Arc<MatchStateStore>,
    following: Option<SpawnHandle>,
}

impl MatchSession {
    pub fn new(store: Arc<MatchStateStore>) -> Self {
        Self {
            id: Uuid::new_v4(),
            hb: Instant::now(),
            store,
            following: None,
        }
    }

    fn hb(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(session_id = %act.id, "WebSocket heartbeat timeout, disconnecting");
                ctx.stop();
                return;
            }
            act.send(&WsMessage::Ping, ctx);
        });
    }

    fn send(&self, message: &WsMessage, ctx: &mut <Self as Actor>::Context) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(session_id = %self.id, error = %e, "Failed to encode message"),
        }
    }

    /// Send a snapshot, then stream everything committed after it
    fn resync(&mut self, ctx: &mut <Self as Actor>::Context) {
        let store = self.store.clone();
        let fetch = wrap_future::<_, Self>(async move { store.snapshot().await });

        ctx.wait(fetch.map(|snapshot, act, ctx| {
            let sequence = snapshot.sequence;
            act.send(&WsMessage::Snapshot { snapshot }, ctx);
            act.follow(sequence, ctx);
        }));
    }

    /// Replace the current subscription with one starting after `sequence`
    fn follow(&mut self, sequence: u64, ctx: &mut <Self as Actor>::Context) {
        if let Some(handle) = self.following.take() {
            ctx.cancel_future(handle);
        }

        match self.store.channel().subscribe(sequence) {
            Ok(subscription) => {
                debug!(session_id = %self.id, from_sequence = sequence, "Following match");
                self.following = Some(ctx.add_stream(subscription));
            }
            Err(fault) => {
                debug!(session_id = %self.id, fault = %fault, "Replay unavailable, resending snapshot");
                self.resync(ctx);
            }
        }
    }

    fn handle_message(&mut self, msg: &str, ctx: &mut <Self as Actor>::Context) {
        match serde_json::from_str::<WsMessage>(msg) {
            Ok(WsMessage::Resync { from_sequence }) => {
                let latest = self.store.channel().latest_sequence();
                match replay_start(from_sequence, latest) {
                    Some(sequence) => self.follow(sequence, ctx),
                    None => {
                        debug!(
                            session_id = %self.id,
                            requested = ?from_sequence,
                            latest,
                            "Resync needs a snapshot"
                        );
                        self.resync(ctx);
                    }
                }
            }
            Ok(WsMessage::Ping) => self.send(&WsMessage::Pong, ctx),
            Ok(WsMessage::Pong) => self.hb = Instant::now(),
            Ok(_) => {
                warn!(session_id = %self.id, "Received unexpected message type");
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to parse WebSocket message");
                self.send(
                    &WsMessage::Error {
                        message: "Invalid message format".to_string(),
                    },
                    ctx,
                );
            }
        }
    }
}

/// Where a replay can start for a client at `requested`. A client claiming
/// to be ahead of the store holds state the store never committed, so it
/// gets a snapshot instead.
fn replay_start(requested: Option<u64>, latest: u64) -> Option<u64> {
    requested.filter(|&sequence| sequence <= latest)
}

impl Actor for MatchSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            session_id = %self.id,
            match_id = %self.store.match_id(),
            "WebSocket connection established"
        );
        self.hb(ctx);
        self.resync(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(session_id = %self.id, "WebSocket connection closed");
    }
}

/// Frames from the client
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MatchSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.handle_message(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(session_id = %self.id, "Binary messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.id, reason = ?reason, "Client initiated close");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Deltas from the match's update channel
impl StreamHandler<Result<UpdateDelta, SyncFault>> for MatchSession {
    fn handle(&mut self, item: Result<UpdateDelta, SyncFault>, ctx: &mut Self::Context) {
        match item {
            Ok(delta) => self.send(&WsMessage::Delta { delta }, ctx),
            Err(fault) => {
                warn!(session_id = %self.id, fault = %fault, "Subscription failed, resyncing");
                self.send(
                    &WsMessage::Error {
                        message: fault.to_string(),
                    },
                    ctx,
                );
                self.resync(ctx);
            }
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // Match completed; the socket stays open for the final state
        debug!(session_id = %self.id, "Match stream finished");
    }
}

/// WebSocket endpoint handler
/// WS /ws/matches/:id
pub async fn match_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let match_id = path.into_inner();
    info!(match_id = %match_id, "New WebSocket connection request");

    let store = state.registry.get(match_id).await?;

    ws::start(MatchSession::new(store), &req, stream)
}

/// Configure WebSocket routes
pub fn configure_ws_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/matches/{id}", web::get().to(match_websocket));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeltaChange, MatchTimer};
    use chrono::Utc;

    #[test]
    fn test_resync_request_parsing() {
        let msg: WsMessage =
            serde_json::from_str(r#"{"type":"resync","from_sequence":41}"#).unwrap();
        assert!(matches!(
            msg,
            WsMessage::Resync {
                from_sequence: Some(41)
            }
        ));

        let msg: WsMessage = serde_json::from_str(r#"{"type":"resync"}"#).unwrap();
        assert!(matches!(msg, WsMessage::Resync { from_sequence: None }));
    }

    #[test]
    fn test_delta_message_wire_shape() {
        let msg = WsMessage::Delta {
            delta: UpdateDelta {
                match_id: Uuid::nil(),
                sequence: 7,
                timestamp: Utc::now(),
                change: DeltaChange::Timer {
                    timer: MatchTimer {
                        elapsed_secs: 30,
                        running: true,
                    },
                },
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["delta"]["sequence"], 7);
        assert_eq!(json["delta"]["change"]["path"], "timer");
    }

    #[test]
    fn test_resync_ahead_of_store_falls_back_to_snapshot() {
        assert_eq!(replay_start(Some(3), 5), Some(3));
        assert_eq!(replay_start(Some(5), 5), Some(5));
        assert_eq!(replay_start(Some(0), 0), Some(0));
        assert_eq!(replay_start(Some(9), 5), None);
        assert_eq!(replay_start(None, 5), None);
    }

    #[test]
    fn test_ping_is_bare() {
        let json = serde_json::to_string(&WsMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }
}
