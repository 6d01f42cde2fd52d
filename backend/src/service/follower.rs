//! Remote follower: a broadcast overlay for one match, kept in sync with the
//! owning server through the Redis relay or, without Redis, HTTP polling.
//! Snapshots and gap repair always come from the server's HTTP API.

use crate::config::FollowerConfig;
use crate::service::subscriber_view::{BroadcastOverlayView, SubscriberView};
use crate::service::sync_fault::SyncFault;
use crate::service::transport::{HttpSyncSource, PollingTransport, RedisRelay};
use crate::service::view_sync::ViewSync;
use tracing::{info, warn};

/// Follow the configured match until it completes, returning the final view
pub async fn follow_match(config: &FollowerConfig) -> Result<BroadcastOverlayView, SyncFault> {
    let sync = &config.sync;
    let retry = sync.retry_policy();
    let source = HttpSyncSource::new(&config.server_url, config.match_id, sync.poll_timeout())?;

    // Subscribe before mounting so deltas committed in between still arrive
    let relayed = match &config.redis {
        Some(redis) => {
            let relay = RedisRelay::connect(&redis.url, sync.delta_buffer_retention_secs).await?;
            Some(relay.subscribe(config.match_id).await?)
        }
        None => None,
    };

    let mut view_sync = ViewSync::new(
        BroadcastOverlayView::new(sync.reorder_window),
        source.clone(),
        retry.clone(),
    );
    view_sync.mount().await?;
    let from_sequence = view_sync.view().projection().sequence();

    let (_polling, events) = match relayed {
        Some(events) => {
            info!(match_id = %config.match_id, from_sequence, "Following through Redis relay");
            (None, events)
        }
        None => {
            info!(
                match_id = %config.match_id,
                from_sequence,
                interval_ms = sync.poll_interval_ms,
                "Following through HTTP polling"
            );
            let (transport, events) =
                PollingTransport::spawn(source, from_sequence, sync.poll_interval(), retry);
            (Some(transport), events)
        }
    };

    Ok(view_sync.run_observed(events, log_overlay).await)
}

fn log_overlay(view: &BroadcastOverlayView) {
    let sequence = view.projection().sequence();
    match view.render() {
        Some(frame) => match serde_json::to_string(&frame) {
            Ok(overlay) => info!(sequence, stale = frame.stale, %overlay, "Overlay updated"),
            Err(e) => warn!(sequence, error = %e, "Failed to encode overlay"),
        },
        None => warn!(sequence, "No overlay to render yet"),
    }
}
