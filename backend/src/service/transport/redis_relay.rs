//! Cross-process fan-out through Redis.
//!
//! The store process forwards each committed delta to `match_updates:{id}`
//! and keeps the newest one under `match_update:{id}`. Other processes turn
//! pubsub messages back into [`TransportEvent`]s. Pubsub is fire-and-forget,
//! so receivers rely on sequence gaps to notice lost messages.

use super::{TransportEvent, EVENT_QUEUE_CAPACITY};
use crate::models::UpdateDelta;
use crate::service::sync_fault::{SyncFault, TransportFailure};
use crate::service::update_channel::UpdateChannel;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub fn latest_key(match_id: Uuid) -> String {
    format!("match_update:{}", match_id)
}

pub fn pubsub_channel(match_id: Uuid) -> String {
    format!("match_updates:{}", match_id)
}

#[derive(Clone)]
pub struct RedisRelay {
    client: redis::Client,
    conn: ConnectionManager,
    latest_ttl_secs: u64,
}

impl RedisRelay {
    pub async fn connect(redis_url: &str, latest_ttl_secs: u64) -> Result<Self, TransportFailure> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!("Redis relay connected");
        Ok(Self {
            client,
            conn,
            latest_ttl_secs: latest_ttl_secs.max(1),
        })
    }

    pub async fn ping(&self) -> Result<(), TransportFailure> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Store the delta as the match's newest and publish it
    pub async fn forward(&self, delta: &UpdateDelta) -> Result<(), TransportFailure> {
        let payload = serde_json::to_string(delta)?;
        let mut conn = self.conn.clone();

        let _: () = conn
            .set_ex(latest_key(delta.match_id), &payload, self.latest_ttl_secs)
            .await?;
        let receivers: i64 = conn.publish(pubsub_channel(delta.match_id), &payload).await?;

        debug!(
            match_id = %delta.match_id,
            sequence = delta.sequence,
            receivers,
            "Delta relayed"
        );
        Ok(())
    }

    /// Forward every delta the channel publishes until the match completes
    pub fn spawn_forwarder(&self, channel: Arc<UpdateChannel>) -> JoinHandle<()> {
        let relay = self.clone();

        spawn_pump(channel, move |delta| {
            let relay = relay.clone();
            async move {
                if let Err(e) = relay.forward(&delta).await {
                    error!(
                        match_id = %delta.match_id,
                        sequence = delta.sequence,
                        error = %e,
                        "Failed to relay delta"
                    );
                }
            }
        })
    }

    /// Listen to one match's pubsub channel
    pub async fn subscribe(
        &self,
        match_id: Uuid,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportFailure> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(pubsub_channel(match_id)).await?;
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        tokio::spawn(async move {
            let payloads = pubsub
                .into_on_message()
                .map(|message| message.get_payload::<String>().map_err(TransportFailure::from));
            pump_payloads(match_id, payloads, tx).await;
        });

        info!(match_id = %match_id, "Subscribed to relayed deltas");
        Ok(rx)
    }
}

/// Hand every delta published after the current sequence to `sink`, until
/// the match completes. The starting sequence is read before the task is
/// spawned, so deltas committed while it starts up are still delivered.
/// A pump that lags skips ahead; remote subscribers repair the gap.
pub(crate) fn spawn_pump<F, Fut>(channel: Arc<UpdateChannel>, mut sink: F) -> JoinHandle<()>
where
    F: FnMut(UpdateDelta) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let match_id = channel.match_id();
    let mut from_sequence = channel.latest_sequence();

    tokio::spawn(async move {
        loop {
            let mut subscription = match channel.subscribe(from_sequence) {
                Ok(subscription) => subscription,
                Err(fault) => {
                    warn!(match_id = %match_id, fault = %fault, "Relay pump skipping ahead");
                    from_sequence = channel.latest_sequence();
                    continue;
                }
            };

            while let Some(item) = subscription.next().await {
                match item {
                    Ok(delta) => sink(delta).await,
                    Err(fault) => {
                        warn!(match_id = %match_id, fault = %fault, "Relay pump fell behind");
                    }
                }
            }

            from_sequence = subscription.last_sequence();
            if channel.is_closed() && from_sequence >= channel.latest_sequence() {
                debug!(match_id = %match_id, "Relay pump finished");
                return;
            }
        }
    })
}

/// Turn raw pubsub payloads into transport events. The end of the payload
/// stream is reported as a closed transport so the view resyncs.
async fn pump_payloads<S>(match_id: Uuid, payloads: S, tx: mpsc::Sender<TransportEvent>)
where
    S: Stream<Item = Result<String, TransportFailure>>,
{
    tokio::pin!(payloads);
    while let Some(payload) = payloads.next().await {
        let event = match payload.and_then(|json| decode_delta(&json)) {
            Ok(delta) => TransportEvent::Delta(delta),
            Err(failure) => {
                warn!(match_id = %match_id, failure = %failure, "Undeliverable relay message");
                TransportEvent::Failure(failure.into())
            }
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }

    warn!(match_id = %match_id, "Redis pubsub stream closed");
    let _ = tx
        .send(TransportEvent::Failure(SyncFault::Transport(
            TransportFailure::Closed,
        )))
        .await;
}

fn decode_delta(json: &str) -> Result<UpdateDelta, TransportFailure> {
    Ok(serde_json::from_str(json)?)
}
