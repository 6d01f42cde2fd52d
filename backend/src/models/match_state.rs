use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub type PlayerId = u64;

/// Match lifecycle status - the finite state machine driven by admin actions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Paused,
    Completed,
}

impl MatchStatus {
    /// Check if transition to another status is valid
    pub fn can_transition_to(&self, to: &MatchStatus) -> bool {
        match (self, to) {
            // UPCOMING -> LIVE
            (MatchStatus::Upcoming, MatchStatus::Live) => true,
            // LIVE <-> PAUSED
            (MatchStatus::Live, MatchStatus::Paused) => true,
            (MatchStatus::Paused, MatchStatus::Live) => true,
            // LIVE -> COMPLETED
            (MatchStatus::Live, MatchStatus::Completed) => true,
            // Everything else, including same-status requests
            _ => false,
        }
    }

    /// Get all valid next statuses from the current one
    pub fn valid_next_states(&self) -> Vec<MatchStatus> {
        match self {
            MatchStatus::Upcoming => vec![MatchStatus::Live],
            MatchStatus::Live => vec![MatchStatus::Paused, MatchStatus::Completed],
            MatchStatus::Paused => vec![MatchStatus::Live],
            MatchStatus::Completed => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MapStatus {
    Upcoming,
    Ongoing,
    Completed,
}

impl MapStatus {
    pub fn can_transition_to(&self, to: &MapStatus) -> bool {
        matches!(
            (self, to),
            (MapStatus::Upcoming, MapStatus::Ongoing) | (MapStatus::Ongoing, MapStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TeamSide {
    Team1,
    Team2,
}

/// Best-of-N series format. Only odd N up to 9 are playable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub struct MatchFormat {
    best_of: u8,
}

impl MatchFormat {
    pub const ALLOWED: [u8; 5] = [1, 3, 5, 7, 9];

    pub fn best_of(n: u8) -> Option<Self> {
        Self::ALLOWED.contains(&n).then_some(Self { best_of: n })
    }

    pub fn map_count(&self) -> usize {
        self.best_of as usize
    }

    /// Map wins that clinch the series, `ceil(N/2)`.
    pub fn wins_needed(&self) -> u8 {
        self.best_of / 2 + 1
    }
}

impl TryFrom<u8> for MatchFormat {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MatchFormat::best_of(value)
            .ok_or_else(|| format!("unsupported format best-of-{}", value))
    }
}

impl From<MatchFormat> for u8 {
    fn from(format: MatchFormat) -> Self {
        format.best_of
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeriesScore {
    pub team1_wins: u8,
    pub team2_wins: u8,
}

impl SeriesScore {
    /// Recount the series from map winners
    pub fn from_maps(maps: &[MapState]) -> Self {
        maps.iter()
            .filter_map(|map| map.winner)
            .fold(SeriesScore::default(), |mut score, side| {
                match side {
                    TeamSide::Team1 => score.team1_wins += 1,
                    TeamSide::Team2 => score.team2_wins += 1,
                }
                score
            })
    }

    pub fn total(&self) -> u8 {
        self.team1_wins + self.team2_wins
    }

    /// The side that clinched the series, if any
    pub fn clinched_by(&self, format: MatchFormat) -> Option<TeamSide> {
        let needed = format.wins_needed();
        if self.team1_wins >= needed {
            Some(TeamSide::Team1)
        } else if self.team2_wins >= needed {
            Some(TeamSide::Team2)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamRoster {
    pub name: String,
    pub players: Vec<PlayerId>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchTimer {
    pub elapsed_secs: u64,
    pub running: bool,
}

/// Additive per-player stat counters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatField {
    Eliminations,
    Deaths,
    Assists,
    Damage,
    Healing,
    DamageBlocked,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerMapStats {
    pub hero_id: Option<String>,
    pub eliminations: u64,
    pub deaths: u64,
    pub assists: u64,
    pub damage: u64,
    pub healing: u64,
    pub damage_blocked: u64,
}

impl PlayerMapStats {
    pub fn get(&self, field: StatField) -> u64 {
        match field {
            StatField::Eliminations => self.eliminations,
            StatField::Deaths => self.deaths,
            StatField::Assists => self.assists,
            StatField::Damage => self.damage,
            StatField::Healing => self.healing,
            StatField::DamageBlocked => self.damage_blocked,
        }
    }

    pub fn set(&mut self, field: StatField, value: u64) {
        let slot = match field {
            StatField::Eliminations => &mut self.eliminations,
            StatField::Deaths => &mut self.deaths,
            StatField::Assists => &mut self.assists,
            StatField::Damage => &mut self.damage,
            StatField::Healing => &mut self.healing,
            StatField::DamageBlocked => &mut self.damage_blocked,
        };
        *slot = value;
    }
}

/// A single hero change, kept for audit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeroSwap {
    pub player_id: PlayerId,
    pub previous_hero: Option<String>,
    pub hero_id: String,
    pub swapped_at: DateTime<Utc>,
}

/// What an admin can change about one player on one map
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerStatChange {
    Increment { field: StatField, amount: u64 },
    Hero { hero_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapState {
    pub map_number: u8,
    pub map_name: String,
    pub mode: String,
    pub team1_score: u32,
    pub team2_score: u32,
    pub status: MapStatus,
    pub winner: Option<TeamSide>,
    pub player_stats: BTreeMap<PlayerId, PlayerMapStats>,
    pub hero_swaps: Vec<HeroSwap>,
}

impl MapState {
    fn new(map_number: u8, setup: MapSetup, roster: &[PlayerId]) -> Self {
        Self {
            map_number,
            map_name: setup.map_name,
            mode: setup.mode,
            team1_score: 0,
            team2_score: 0,
            status: MapStatus::Upcoming,
            winner: None,
            player_stats: roster
                .iter()
                .map(|player| (*player, PlayerMapStats::default()))
                .collect(),
            hero_swaps: Vec::new(),
        }
    }
}

/// Authoritative state of one match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchState {
    pub match_id: Uuid,
    pub status: MatchStatus,
    pub format: MatchFormat,
    pub series_score: SeriesScore,
    pub current_map_index: usize,
    pub maps: Vec<MapState>,
    pub team1: TeamRoster,
    pub team2: TeamRoster,
    pub timer: MatchTimer,
    pub created_at: DateTime<Utc>,
}

impl MatchState {
    /// Build a fresh match. Missing map setups are filled with placeholders
    /// so that `maps.len()` always equals the series length.
    pub fn new(
        match_id: Uuid,
        format: MatchFormat,
        team1: TeamRoster,
        team2: TeamRoster,
        setups: Vec<MapSetup>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let roster: Vec<PlayerId> = team1
            .players
            .iter()
            .chain(team2.players.iter())
            .copied()
            .collect();

        let mut setups = setups.into_iter();
        let maps = (1..=format.map_count() as u8)
            .map(|number| {
                let setup = setups.next().unwrap_or_else(|| MapSetup {
                    map_name: format!("Map {}", number),
                    mode: "TBD".to_string(),
                });
                MapState::new(number, setup, &roster)
            })
            .collect();

        Self {
            match_id,
            status: MatchStatus::Upcoming,
            format,
            series_score: SeriesScore::default(),
            current_map_index: 0,
            maps,
            team1,
            team2,
            timer: MatchTimer::default(),
            created_at,
        }
    }

    pub fn roster_contains(&self, player_id: PlayerId) -> bool {
        self.team1.players.contains(&player_id) || self.team2.players.contains(&player_id)
    }

    pub fn side_of(&self, player_id: PlayerId) -> Option<TeamSide> {
        if self.team1.players.contains(&player_id) {
            Some(TeamSide::Team1)
        } else if self.team2.players.contains(&player_id) {
            Some(TeamSide::Team2)
        } else {
            None
        }
    }

    pub fn current_map(&self) -> Option<&MapState> {
        self.maps.get(self.current_map_index)
    }

    pub fn ongoing_map_index(&self) -> Option<usize> {
        self.maps
            .iter()
            .position(|map| map.status == MapStatus::Ongoing)
    }
}

/// Consistent copy of a match at a given sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchSnapshot {
    pub state: MatchState,
    pub sequence: u64,
}

// ===== API DTOs =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct MapSetup {
    #[validate(length(min = 1, max = 64))]
    pub map_name: String,
    #[validate(length(min = 1, max = 32))]
    pub mode: String,
}

fn validate_best_of(best_of: u8) -> Result<(), ValidationError> {
    if MatchFormat::ALLOWED.contains(&best_of) {
        Ok(())
    } else {
        Err(ValidationError::new("best_of"))
    }
}

fn validate_roster(players: &[PlayerId]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    if players.iter().all(|player| seen.insert(*player)) {
        Ok(())
    } else {
        Err(ValidationError::new("duplicate_player"))
    }
}

/// Create Match Request DTO
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateMatchDTO {
    #[validate(custom(function = "validate_best_of"))]
    pub best_of: u8,
    #[validate(length(min = 1, max = 64))]
    pub team1_name: String,
    #[validate(length(min = 1, max = 64))]
    pub team2_name: String,
    #[validate(length(min = 1, max = 12), custom(function = "validate_roster"))]
    pub team1_players: Vec<PlayerId>,
    #[validate(length(min = 1, max = 12), custom(function = "validate_roster"))]
    pub team2_players: Vec<PlayerId>,
    #[serde(default)]
    #[validate(length(max = 9), nested)]
    pub maps: Vec<MapSetup>,
}

impl CreateMatchDTO {
    /// Cross-field checks the derive cannot express
    pub fn validate_full(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())?;
        if self.maps.len() > self.best_of as usize {
            return Err(format!(
                "{} maps supplied for a best-of-{}",
                self.maps.len(),
                self.best_of
            ));
        }
        if self
            .team1_players
            .iter()
            .any(|player| self.team2_players.contains(player))
        {
            return Err("a player cannot be on both rosters".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreUpdateDTO {
    pub team1_delta: u32,
    pub team2_delta: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreCorrectionDTO {
    pub team1_score: u32,
    pub team2_score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStatusDTO {
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapStatusDTO {
    pub status: MapStatus,
    #[serde(default)]
    pub winner: Option<TeamSide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerDTO {
    pub elapsed_secs: u64,
    pub running: bool,
}
