use super::{TransportEvent, EVENT_QUEUE_CAPACITY};
use crate::service::update_channel::UpdateChannel;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// In-process push: pumps a channel subscription into an event queue
pub struct LocalTransport {
    handle: JoinHandle<()>,
}

impl LocalTransport {
    /// Start forwarding every delta after `from_sequence`. A subscription
    /// that cannot start (evicted backfill) or that lags surfaces as one
    /// `Failure` event and ends the transport.
    pub fn spawn(
        channel: Arc<UpdateChannel>,
        from_sequence: u64,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let handle = tokio::spawn(async move {
            let match_id = channel.match_id();
            let mut subscription = match channel.subscribe(from_sequence) {
                Ok(subscription) => subscription,
                Err(fault) => {
                    let _ = tx.send(TransportEvent::Failure(fault)).await;
                    return;
                }
            };
            // The channel itself is not needed once subscribed
            drop(channel);

            while let Some(item) = subscription.next().await {
                let event = match item {
                    Ok(delta) => TransportEvent::Delta(delta),
                    Err(fault) => {
                        warn!(match_id = %match_id, fault = %fault, "Local subscription failed");
                        TransportEvent::Failure(fault)
                    }
                };
                if tx.send(event).await.is_err() {
                    debug!(match_id = %match_id, "Local transport consumer went away");
                    return;
                }
            }
            debug!(match_id = %match_id, "Local subscription finished");
        });

        (Self { handle }, rx)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
