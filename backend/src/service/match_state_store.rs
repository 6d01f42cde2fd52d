use crate::models::*;
use crate::service::journal::Journal;
use crate::service::update_channel::{ChannelConfig, UpdateChannel};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Compact the journal into a fresh snapshot every this many deltas
const SNAPSHOT_EVERY: u64 = 100;

/// Caller errors raised by store mutations. Never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchStateError {
    #[error("Map index {index} out of range, match has {map_count} maps")]
    InvalidMapIndex { index: usize, map_count: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Match is completed and read-only")]
    MatchCompleted,

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Player {0} is not on either roster")]
    UnknownPlayer(PlayerId),

    #[error("Journal error: {0}")]
    Journal(String),
}

struct StoreInner {
    state: MatchState,
    sequence: u64,
}

/// Single authoritative owner of one match's live state.
///
/// Mutations are serialized through one async mutex; each successful one is
/// journaled, applied, assigned the next sequence and published, in that
/// order. A rejected mutation leaves state and sequence untouched.
pub struct MatchStateStore {
    match_id: Uuid,
    inner: Mutex<StoreInner>,
    channel: Arc<UpdateChannel>,
    journal: Arc<Journal>,
}

impl MatchStateStore {
    /// Start a new match at sequence 0 and persist its initial snapshot
    pub async fn create(
        state: MatchState,
        journal: Arc<Journal>,
        channel_config: ChannelConfig,
    ) -> Result<Self, MatchStateError> {
        let snapshot = MatchSnapshot {
            state,
            sequence: 0,
        };
        journal
            .save_snapshot(&snapshot)
            .await
            .map_err(|e| MatchStateError::Journal(e.to_string()))?;

        info!(
            match_id = %snapshot.state.match_id,
            best_of = u8::from(snapshot.state.format),
            "Match state store created"
        );

        Ok(Self::restore(snapshot, journal, channel_config))
    }

    /// Resume from a recovered snapshot
    pub fn restore(
        snapshot: MatchSnapshot,
        journal: Arc<Journal>,
        channel_config: ChannelConfig,
    ) -> Self {
        let match_id = snapshot.state.match_id;
        Self {
            match_id,
            channel: Arc::new(UpdateChannel::new(
                match_id,
                channel_config,
                snapshot.sequence,
            )),
            inner: Mutex::new(StoreInner {
                state: snapshot.state,
                sequence: snapshot.sequence,
            }),
            journal,
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn channel(&self) -> Arc<UpdateChannel> {
        self.channel.clone()
    }

    /// Immutable copy of the current state and the sequence it reflects
    pub async fn snapshot(&self) -> MatchSnapshot {
        let inner = self.inner.lock().await;
        MatchSnapshot {
            state: inner.state.clone(),
            sequence: inner.sequence,
        }
    }

    // =============================================================================
    // SCORES
    // =============================================================================

    /// Add points to a map's score. Increments are unsigned so scores only grow.
    pub async fn apply_score_update(
        &self,
        map_index: usize,
        team1_delta: u32,
        team2_delta: u32,
    ) -> Result<UpdateDelta, MatchStateError> {
        let mut inner = self.inner.lock().await;
        let state = &inner.state;
        ensure_open(state)?;
        let map = ongoing_map(state, map_index)?;

        if team1_delta == 0 && team2_delta == 0 {
            return Err(MatchStateError::InvalidState(
                "score update changes nothing".to_string(),
            ));
        }

        let team1_score = map
            .team1_score
            .checked_add(team1_delta)
            .ok_or_else(|| MatchStateError::InvalidState("team1 score overflow".to_string()))?;
        let team2_score = map
            .team2_score
            .checked_add(team2_delta)
            .ok_or_else(|| MatchStateError::InvalidState("team2 score overflow".to_string()))?;

        self.commit(
            &mut inner,
            DeltaChange::MapScore {
                map_index,
                team1_score,
                team2_score,
            },
            Utc::now(),
        )
        .await
    }

    /// Explicit admin correction: overwrite a map's score, lower values allowed
    pub async fn correct_map_score(
        &self,
        map_index: usize,
        team1_score: u32,
        team2_score: u32,
    ) -> Result<UpdateDelta, MatchStateError> {
        let mut inner = self.inner.lock().await;
        let state = &inner.state;
        ensure_open(state)?;
        let map = ongoing_map(state, map_index)?;

        warn!(
            match_id = %self.match_id,
            map_index,
            from = ?(map.team1_score, map.team2_score),
            to = ?(team1_score, team2_score),
            "Applying admin score correction"
        );

        self.commit(
            &mut inner,
            DeltaChange::ScoreCorrection {
                map_index,
                team1_score,
                team2_score,
            },
            Utc::now(),
        )
        .await
    }

    // =============================================================================
    // PLAYER STATS
    // =============================================================================

    /// Add to one stat counter, or replace the player's hero
    pub async fn apply_player_stat_update(
        &self,
        map_index: usize,
        player_id: PlayerId,
        change: PlayerStatChange,
    ) -> Result<UpdateDelta, MatchStateError> {
        let mut inner = self.inner.lock().await;
        let state = &inner.state;
        ensure_open(state)?;
        map_at(state, map_index)?;
        if !state.roster_contains(player_id) {
            return Err(MatchStateError::UnknownPlayer(player_id));
        }
        let map = ongoing_map(state, map_index)?;
        let stats = map
            .player_stats
            .get(&player_id)
            .cloned()
            .unwrap_or_default();

        let now = Utc::now();
        let change = match change {
            PlayerStatChange::Increment { field, amount } => {
                if amount == 0 {
                    return Err(MatchStateError::InvalidState(
                        "stat increment must be positive".to_string(),
                    ));
                }
                let value = stats.get(field).checked_add(amount).ok_or_else(|| {
                    MatchStateError::InvalidState(format!("{:?} overflow", field))
                })?;
                DeltaChange::PlayerStat {
                    map_index,
                    player_id,
                    field,
                    value,
                }
            }
            PlayerStatChange::Hero { hero_id } => {
                let hero_id = hero_id.trim().to_string();
                if hero_id.is_empty() {
                    return Err(MatchStateError::InvalidState(
                        "hero id must not be empty".to_string(),
                    ));
                }
                DeltaChange::HeroSwap {
                    map_index,
                    swap: HeroSwap {
                        player_id,
                        previous_hero: stats.hero_id,
                        hero_id,
                        swapped_at: now,
                    },
                }
            }
        };

        self.commit(&mut inner, change, now).await
    }

    // =============================================================================
    // STATUS TRANSITIONS
    // =============================================================================

    /// Move the match through `upcoming -> live -> {paused <-> live} -> completed`
    pub async fn transition_status(
        &self,
        new_status: MatchStatus,
    ) -> Result<UpdateDelta, MatchStateError> {
        let mut inner = self.inner.lock().await;
        let state = &inner.state;

        if !state.status.can_transition_to(&new_status) {
            return Err(MatchStateError::InvalidTransition {
                from: format!("{:?}", state.status),
                to: format!("{:?}", new_status),
            });
        }

        // Going live for the first time opens the current map
        let started_map = (state.status == MatchStatus::Upcoming
            && new_status == MatchStatus::Live
            && state.ongoing_map_index().is_none()
            && state
                .current_map()
                .is_some_and(|map| map.status == MapStatus::Upcoming))
        .then_some(state.current_map_index);

        info!(
            match_id = %self.match_id,
            from = ?state.status,
            to = ?new_status,
            "Transitioning match status"
        );

        self.commit(
            &mut inner,
            DeltaChange::MatchStatus {
                status: new_status,
                started_map,
            },
            Utc::now(),
        )
        .await
    }

    /// Move one map through `upcoming -> ongoing -> completed`.
    ///
    /// Completing a map recounts the series. Reaching the win threshold
    /// completes the match; otherwise the next map opens while the match is
    /// live.
    pub async fn transition_map_status(
        &self,
        map_index: usize,
        new_status: MapStatus,
        winner: Option<TeamSide>,
    ) -> Result<UpdateDelta, MatchStateError> {
        let mut inner = self.inner.lock().await;
        let state = &inner.state;
        ensure_open(state)?;
        let map = map_at(state, map_index)?;

        if state.status == MatchStatus::Upcoming {
            return Err(MatchStateError::InvalidState(
                "match has not gone live yet".to_string(),
            ));
        }
        if !map.status.can_transition_to(&new_status) {
            return Err(MatchStateError::InvalidTransition {
                from: format!("{:?}", map.status),
                to: format!("{:?}", new_status),
            });
        }

        let change = match new_status {
            MapStatus::Ongoing => {
                if winner.is_some() {
                    return Err(MatchStateError::InvalidState(
                        "winner can only be set when completing a map".to_string(),
                    ));
                }
                if let Some(ongoing) = state.ongoing_map_index() {
                    return Err(MatchStateError::InvalidState(format!(
                        "map {} is still ongoing",
                        ongoing + 1
                    )));
                }
                DeltaChange::MapStarted { map_index }
            }
            MapStatus::Completed => {
                let winner = winner.ok_or_else(|| {
                    MatchStateError::InvalidState("completing a map requires a winner".to_string())
                })?;
                map_result(state, map_index, winner)
            }
            MapStatus::Upcoming => {
                return Err(MatchStateError::InvalidTransition {
                    from: format!("{:?}", map.status),
                    to: format!("{:?}", new_status),
                })
            }
        };

        if let DeltaChange::MapResult {
            series_score,
            match_status: MatchStatus::Completed,
            ..
        } = &change
        {
            info!(
                match_id = %self.match_id,
                team1_wins = series_score.team1_wins,
                team2_wins = series_score.team2_wins,
                "Series clinched, match completed"
            );
        }

        self.commit(&mut inner, change, Utc::now()).await
    }

    pub async fn set_timer(
        &self,
        elapsed_secs: u64,
        running: bool,
    ) -> Result<UpdateDelta, MatchStateError> {
        let mut inner = self.inner.lock().await;
        ensure_open(&inner.state)?;

        self.commit(
            &mut inner,
            DeltaChange::Timer {
                timer: MatchTimer {
                    elapsed_secs,
                    running,
                },
            },
            Utc::now(),
        )
        .await
    }

    // =============================================================================
    // HELPER METHODS
    // =============================================================================

    /// Journal, apply, sequence and publish one change
    async fn commit(
        &self,
        inner: &mut StoreInner,
        change: DeltaChange,
        timestamp: DateTime<Utc>,
    ) -> Result<UpdateDelta, MatchStateError> {
        let delta = UpdateDelta {
            match_id: self.match_id,
            sequence: inner.sequence + 1,
            timestamp,
            change,
        };

        self.journal.append(&delta).await.map_err(|e| {
            error!(
                match_id = %self.match_id,
                sequence = delta.sequence,
                error = %e,
                "Failed to journal mutation"
            );
            MatchStateError::Journal(e.to_string())
        })?;

        delta.change.apply_to(&mut inner.state);
        inner.sequence = delta.sequence;

        if inner.sequence % SNAPSHOT_EVERY == 0 {
            let snapshot = MatchSnapshot {
                state: inner.state.clone(),
                sequence: inner.sequence,
            };
            if let Err(e) = self.journal.save_snapshot(&snapshot).await {
                // Deltas are already durable; compaction can wait
                warn!(match_id = %self.match_id, error = %e, "Snapshot compaction failed");
            }
        }

        self.channel.publish(delta.clone());

        debug!(
            match_id = %self.match_id,
            sequence = delta.sequence,
            path = %delta.change.path(),
            "Mutation committed"
        );

        Ok(delta)
    }
}

fn ensure_open(state: &MatchState) -> Result<(), MatchStateError> {
    if state.status.is_terminal() {
        return Err(MatchStateError::MatchCompleted);
    }
    Ok(())
}

fn map_at(state: &MatchState, map_index: usize) -> Result<&MapState, MatchStateError> {
    state
        .maps
        .get(map_index)
        .ok_or(MatchStateError::InvalidMapIndex {
            index: map_index,
            map_count: state.maps.len(),
        })
}

fn ongoing_map(state: &MatchState, map_index: usize) -> Result<&MapState, MatchStateError> {
    let map = map_at(state, map_index)?;
    if map.status != MapStatus::Ongoing {
        return Err(MatchStateError::InvalidState(format!(
            "map {} is {:?}, not ongoing",
            map.map_number, map.status
        )));
    }
    Ok(map)
}

/// Result of completing `map_index` with `winner`, including everything the
/// completion implies for the series
fn map_result(state: &MatchState, map_index: usize, winner: TeamSide) -> DeltaChange {
    let mut maps = state.maps.clone();
    maps[map_index].winner = Some(winner);
    let series_score = SeriesScore::from_maps(&maps);

    if series_score.clinched_by(state.format).is_some() {
        return DeltaChange::MapResult {
            map_index,
            winner,
            series_score,
            match_status: MatchStatus::Completed,
            current_map_index: map_index,
            next_map_started: false,
        };
    }

    let next = maps
        .iter()
        .enumerate()
        .skip(map_index + 1)
        .find(|(_, map)| map.status == MapStatus::Upcoming)
        .map(|(index, _)| index);

    DeltaChange::MapResult {
        map_index,
        winner,
        series_score,
        match_status: state.status,
        current_map_index: next.unwrap_or(map_index),
        next_map_started: next.is_some() && state.status == MatchStatus::Live,
    }
}
