use anyhow::Context;
use tokio::signal;

use livescore_backend::config::FollowerConfig;
use livescore_backend::service::follower::follow_match;
use livescore_backend::service::subscriber_view::SubscriberView;
use livescore_backend::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = FollowerConfig::from_env().context("Failed to load follower configuration")?;
    init_telemetry(&config.rust_log);

    tracing::info!(
        match_id = %config.match_id,
        server = %config.server_url,
        relay = config.redis.is_some(),
        "Starting match follower"
    );

    tokio::select! {
        followed = follow_match(&config) => {
            let view = followed.context("Lost the match")?;
            tracing::info!(
                match_id = %config.match_id,
                sequence = view.projection().sequence(),
                "Match completed"
            );
        }
        stop = signal::ctrl_c() => {
            stop.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping follower");
        }
    }

    Ok(())
}
