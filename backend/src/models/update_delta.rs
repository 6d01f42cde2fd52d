use crate::models::match_state::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One logical field of a match and its value after the mutation.
///
/// Values are absolute rather than relative, so folding the same change into
/// a projection twice leaves it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "path", content = "value", rename_all = "snake_case")]
pub enum DeltaChange {
    MatchStatus {
        status: MatchStatus,
        /// Map moved to ongoing as part of going live
        started_map: Option<usize>,
    },
    MapStarted {
        map_index: usize,
    },
    MapScore {
        map_index: usize,
        team1_score: u32,
        team2_score: u32,
    },
    ScoreCorrection {
        map_index: usize,
        team1_score: u32,
        team2_score: u32,
    },
    PlayerStat {
        map_index: usize,
        player_id: PlayerId,
        field: StatField,
        value: u64,
    },
    HeroSwap {
        map_index: usize,
        swap: HeroSwap,
    },
    MapResult {
        map_index: usize,
        winner: TeamSide,
        series_score: SeriesScore,
        match_status: MatchStatus,
        current_map_index: usize,
        next_map_started: bool,
    },
    Timer {
        timer: MatchTimer,
    },
}

impl DeltaChange {
    /// Human readable field path, used in logs
    pub fn path(&self) -> String {
        match self {
            DeltaChange::MatchStatus { .. } => "status".to_string(),
            DeltaChange::MapStarted { map_index } => format!("maps[{}].status", map_index),
            DeltaChange::MapScore { map_index, .. } | DeltaChange::ScoreCorrection { map_index, .. } => {
                format!("maps[{}].score", map_index)
            }
            DeltaChange::PlayerStat {
                map_index,
                player_id,
                field,
                ..
            } => format!("maps[{}].player_stats[{}].{:?}", map_index, player_id, field),
            DeltaChange::HeroSwap { map_index, swap } => {
                format!("maps[{}].player_stats[{}].hero_id", map_index, swap.player_id)
            }
            DeltaChange::MapResult { map_index, .. } => format!("maps[{}].winner", map_index),
            DeltaChange::Timer { .. } => "timer".to_string(),
        }
    }

    /// Whether this change moves the match into its terminal status
    pub fn completes_match(&self) -> bool {
        matches!(
            self,
            DeltaChange::MatchStatus {
                status: MatchStatus::Completed,
                ..
            } | DeltaChange::MapResult {
                match_status: MatchStatus::Completed,
                ..
            }
        )
    }

    /// Fold this change into a match state.
    ///
    /// Indices that do not resolve are skipped; a projection fed by a foreign
    /// transport must never panic on bad input.
    pub fn apply_to(&self, state: &mut MatchState) {
        match self {
            DeltaChange::MatchStatus {
                status,
                started_map,
            } => {
                state.status = *status;
                if let Some(index) = started_map {
                    if let Some(map) = state.maps.get_mut(*index) {
                        map.status = MapStatus::Ongoing;
                        state.current_map_index = *index;
                    }
                }
            }
            DeltaChange::MapStarted { map_index } => {
                if let Some(map) = state.maps.get_mut(*map_index) {
                    map.status = MapStatus::Ongoing;
                    state.current_map_index = *map_index;
                }
            }
            DeltaChange::MapScore {
                map_index,
                team1_score,
                team2_score,
            }
            | DeltaChange::ScoreCorrection {
                map_index,
                team1_score,
                team2_score,
            } => {
                if let Some(map) = state.maps.get_mut(*map_index) {
                    map.team1_score = *team1_score;
                    map.team2_score = *team2_score;
                }
            }
            DeltaChange::PlayerStat {
                map_index,
                player_id,
                field,
                value,
            } => {
                if let Some(stats) = state
                    .maps
                    .get_mut(*map_index)
                    .and_then(|map| map.player_stats.get_mut(player_id))
                {
                    stats.set(*field, *value);
                }
            }
            DeltaChange::HeroSwap { map_index, swap } => {
                if let Some(map) = state.maps.get_mut(*map_index) {
                    if let Some(stats) = map.player_stats.get_mut(&swap.player_id) {
                        stats.hero_id = Some(swap.hero_id.clone());
                    }
                    if map.hero_swaps.last() != Some(swap) {
                        map.hero_swaps.push(swap.clone());
                    }
                }
            }
            DeltaChange::MapResult {
                map_index,
                winner,
                series_score,
                match_status,
                current_map_index,
                next_map_started,
            } => {
                if let Some(map) = state.maps.get_mut(*map_index) {
                    map.status = MapStatus::Completed;
                    map.winner = Some(*winner);
                }
                state.series_score = *series_score;
                state.status = *match_status;
                state.current_map_index = *current_map_index;
                if *next_map_started {
                    if let Some(next) = state.maps.get_mut(*current_map_index) {
                        next.status = MapStatus::Ongoing;
                    }
                }
            }
            DeltaChange::Timer { timer } => {
                state.timer = *timer;
            }
        }
    }
}

/// The unit of propagation: one sequenced change to one match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateDelta {
    pub match_id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub change: DeltaChange,
}

impl UpdateDelta {
    pub fn completes_match(&self) -> bool {
        self.change.completes_match()
    }
}

/// Response body of the polling endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeltaBatch {
    pub match_id: Uuid,
    pub latest_sequence: u64,
    pub deltas: Vec<UpdateDelta>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaQuery {
    #[serde(default)]
    pub since: u64,
}
