use crate::api_error::ApiError;
use crate::models::*;
use crate::service::journal::Journal;
use crate::service::match_state_store::MatchStateStore;
use crate::service::transport::RedisRelay;
use crate::service::update_channel::ChannelConfig;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Owner of every live match store in this process
pub struct MatchRegistry {
    stores: RwLock<HashMap<Uuid, Arc<MatchStateStore>>>,
    journal: Arc<Journal>,
    channel_config: ChannelConfig,
    relay: Option<RedisRelay>,
}

impl MatchRegistry {
    pub fn new(journal: Arc<Journal>, channel_config: ChannelConfig) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            journal,
            channel_config,
            relay: None,
        }
    }

    /// Relay every store's deltas through Redis as well
    pub fn with_relay(mut self, relay: RedisRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn relay(&self) -> Option<&RedisRelay> {
        self.relay.as_ref()
    }

    pub async fn create_match(&self, dto: CreateMatchDTO) -> Result<Arc<MatchStateStore>, ApiError> {
        dto.validate_full().map_err(ApiError::ValidationError)?;

        let format = MatchFormat::best_of(dto.best_of)
            .ok_or_else(|| ApiError::bad_request(format!("unsupported best_of {}", dto.best_of)))?;
        let state = MatchState::new(
            Uuid::new_v4(),
            format,
            TeamRoster {
                name: dto.team1_name,
                players: dto.team1_players,
            },
            TeamRoster {
                name: dto.team2_name,
                players: dto.team2_players,
            },
            dto.maps,
            Utc::now(),
        );
        let match_id = state.match_id;

        let store = Arc::new(
            MatchStateStore::create(state, self.journal.clone(), self.channel_config.clone())
                .await?,
        );
        self.attach(store.clone()).await;

        info!(match_id = %match_id, "Match registered");
        Ok(store)
    }

    /// Store for `match_id`, restoring it from the journal if needed.
    /// Completed matches restored this way are served read-only and never
    /// rejoin the live set, so archiving sticks.
    pub async fn get(&self, match_id: Uuid) -> Result<Arc<MatchStateStore>, ApiError> {
        if let Some(store) = self.stores.read().await.get(&match_id) {
            return Ok(store.clone());
        }

        let stored = self
            .journal
            .load(match_id)
            .await
            .map_err(|e| ApiError::JournalError(e.to_string()))?
            .ok_or_else(|| ApiError::not_found(format!("match {}", match_id)))?;

        let snapshot = stored.replay();
        if snapshot.state.status.is_terminal() {
            debug!(
                match_id = %match_id,
                sequence = snapshot.sequence,
                "Serving completed match from journal"
            );
            return Ok(Arc::new(MatchStateStore::restore(
                snapshot,
                self.journal.clone(),
                self.channel_config.clone(),
            )));
        }

        let mut stores = self.stores.write().await;
        // Another request may have restored it meanwhile
        if let Some(store) = stores.get(&match_id) {
            return Ok(store.clone());
        }

        info!(
            match_id = %match_id,
            sequence = snapshot.sequence,
            "Match restored from journal"
        );
        let store = Arc::new(MatchStateStore::restore(
            snapshot,
            self.journal.clone(),
            self.channel_config.clone(),
        ));
        stores.insert(match_id, store.clone());
        drop(stores);

        self.spawn_relay(&store);
        Ok(store)
    }

    /// Drop a completed match from the live set after a final snapshot
    pub async fn archive(&self, match_id: Uuid) -> Result<MatchSnapshot, ApiError> {
        let store = self.get(match_id).await?;
        let snapshot = store.snapshot().await;
        if !snapshot.state.status.is_terminal() {
            return Err(ApiError::Conflict(format!(
                "match {} is {:?}, only completed matches can be archived",
                match_id, snapshot.state.status
            )));
        }

        self.journal
            .save_snapshot(&snapshot)
            .await
            .map_err(|e| ApiError::JournalError(e.to_string()))?;
        self.stores.write().await.remove(&match_id);

        info!(
            match_id = %match_id,
            sequence = snapshot.sequence,
            subscribers = store.channel().subscriber_count(),
            "Match archived"
        );
        Ok(snapshot)
    }

    /// Ids of matches currently held in memory
    pub async fn live_matches(&self) -> Vec<Uuid> {
        self.stores.read().await.keys().copied().collect()
    }

    async fn attach(&self, store: Arc<MatchStateStore>) {
        self.stores
            .write()
            .await
            .insert(store.match_id(), store.clone());
        self.spawn_relay(&store);
    }

    fn spawn_relay(&self, store: &MatchStateStore) {
        if let Some(relay) = &self.relay {
            debug!(match_id = %store.match_id(), "Starting Redis relay forwarder");
            relay.spawn_forwarder(store.channel());
        }
    }
}
