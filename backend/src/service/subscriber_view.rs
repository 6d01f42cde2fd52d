//! Rendering surfaces and the local projections they hold.
//!
//! A view never owns authority. It starts from a snapshot, folds deltas in
//! through its [`ReconciliationPolicy`], and renders from that projection
//! only. Rendering takes `&self`, so it cannot disturb the projection.

use crate::models::*;
use crate::service::reconciliation::{ReconciliationPolicy, Reconciled};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    AdminPanel,
    MatchPage,
    BroadcastOverlay,
}

/// How much a view's projection can be trusted right now
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Resyncing,
    /// Resync kept failing; render a "data may be stale" indicator
    Stale,
}

/// A view's local copy of one match
#[derive(Debug, Clone)]
pub struct Projection {
    state: Option<MatchState>,
    policy: ReconciliationPolicy,
    freshness: Freshness,
}

impl Projection {
    pub fn new(reorder_window: usize) -> Self {
        Self {
            state: None,
            policy: ReconciliationPolicy::new(reorder_window),
            freshness: Freshness::Resyncing,
        }
    }

    /// Replace the projection wholesale, keeping buffered deltas that are
    /// newer than the snapshot
    pub fn replace(&mut self, snapshot: MatchSnapshot) {
        let MatchSnapshot {
            mut state,
            sequence,
        } = snapshot;
        self.policy.rebase(sequence, &mut state);
        self.state = Some(state);
        self.freshness = Freshness::Fresh;
    }

    pub fn reconcile(&mut self, delta: UpdateDelta) -> Reconciled {
        match self.state.as_mut() {
            Some(state) => self.policy.accept(delta, state),
            None => self.policy.hold(delta),
        }
    }

    pub fn state(&self) -> Option<&MatchState> {
        self.state.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.policy.last_applied_sequence()
    }

    pub fn has_gap(&self) -> bool {
        self.policy.missing_range().is_some()
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn set_freshness(&mut self, freshness: Freshness) {
        self.freshness = freshness;
    }

    pub fn is_completed(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.status.is_terminal())
    }

    pub fn to_snapshot(&self) -> Option<MatchSnapshot> {
        self.state.as_ref().map(|state| MatchSnapshot {
            state: state.clone(),
            sequence: self.sequence(),
        })
    }
}

/// The contract every rendering surface implements
pub trait SubscriberView {
    type Rendered;

    fn kind(&self) -> ViewKind;

    fn projection(&self) -> &Projection;

    fn projection_mut(&mut self) -> &mut Projection;

    /// Replace the local projection (mount or resync)
    fn on_snapshot(&mut self, snapshot: MatchSnapshot) {
        self.projection_mut().replace(snapshot);
    }

    /// Incremental update through the reconciliation policy
    fn on_delta(&mut self, delta: UpdateDelta) -> Reconciled {
        self.projection_mut().reconcile(delta)
    }

    /// Pure function of the current projection
    fn render(&self) -> Self::Rendered;
}

// =============================================================================
// ADMIN PANEL
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AdminPanelFrame {
    pub state: MatchState,
    pub sequence: u64,
    pub freshness: Freshness,
    pub next_statuses: Vec<MatchStatus>,
}

/// Everything the operator sees, including where the projection stands
pub struct AdminPanelView {
    projection: Projection,
}

impl AdminPanelView {
    pub fn new(reorder_window: usize) -> Self {
        Self {
            projection: Projection::new(reorder_window),
        }
    }
}

impl SubscriberView for AdminPanelView {
    type Rendered = Option<AdminPanelFrame>;

    fn kind(&self) -> ViewKind {
        ViewKind::AdminPanel
    }

    fn projection(&self) -> &Projection {
        &self.projection
    }

    fn projection_mut(&mut self) -> &mut Projection {
        &mut self.projection
    }

    fn render(&self) -> Self::Rendered {
        let state = self.projection.state()?;
        Some(AdminPanelFrame {
            state: state.clone(),
            sequence: self.projection.sequence(),
            freshness: self.projection.freshness(),
            next_statuses: state.status.valid_next_states(),
        })
    }
}

// =============================================================================
// PUBLIC MATCH PAGE
// =============================================================================

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MapSummary {
    pub map_number: u8,
    pub map_name: String,
    pub mode: String,
    pub status: MapStatus,
    pub team1_score: u32,
    pub team2_score: u32,
    pub winner: Option<TeamSide>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchPageFrame {
    pub team1_name: String,
    pub team2_name: String,
    pub status: MatchStatus,
    pub series_score: SeriesScore,
    pub current_map_index: usize,
    pub maps: Vec<MapSummary>,
    pub scoreboard: BTreeMap<PlayerId, PlayerMapStats>,
    pub stale: bool,
}

pub struct MatchPageView {
    projection: Projection,
}

impl MatchPageView {
    pub fn new(reorder_window: usize) -> Self {
        Self {
            projection: Projection::new(reorder_window),
        }
    }
}

impl SubscriberView for MatchPageView {
    type Rendered = Option<MatchPageFrame>;

    fn kind(&self) -> ViewKind {
        ViewKind::MatchPage
    }

    fn projection(&self) -> &Projection {
        &self.projection
    }

    fn projection_mut(&mut self) -> &mut Projection {
        &mut self.projection
    }

    fn render(&self) -> Self::Rendered {
        let state = self.projection.state()?;
        Some(MatchPageFrame {
            team1_name: state.team1.name.clone(),
            team2_name: state.team2.name.clone(),
            status: state.status,
            series_score: state.series_score,
            current_map_index: state.current_map_index,
            maps: state
                .maps
                .iter()
                .map(|map| MapSummary {
                    map_number: map.map_number,
                    map_name: map.map_name.clone(),
                    mode: map.mode.clone(),
                    status: map.status,
                    team1_score: map.team1_score,
                    team2_score: map.team2_score,
                    winner: map.winner,
                })
                .collect(),
            scoreboard: state
                .current_map()
                .map(|map| map.player_stats.clone())
                .unwrap_or_default(),
            stale: self.projection.freshness() == Freshness::Stale,
        })
    }
}

// =============================================================================
// BROADCAST OVERLAY
// =============================================================================

/// Hero slots shown per team on the overlay
const OVERLAY_HERO_SLOTS: usize = 6;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HeroPicks {
    pub team1: Vec<String>,
    pub team2: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OverlayFrame {
    pub team1_name: String,
    pub team2_name: String,
    pub best_of: u8,
    pub series_score: SeriesScore,
    pub live: bool,
    pub current_map: Option<MapSummary>,
    pub hero_picks: HeroPicks,
    pub stale: bool,
}

/// Compact frame for streaming software
pub struct BroadcastOverlayView {
    projection: Projection,
}

impl BroadcastOverlayView {
    pub fn new(reorder_window: usize) -> Self {
        Self {
            projection: Projection::new(reorder_window),
        }
    }
}

fn picks_for(map: &MapState, players: &[PlayerId]) -> Vec<String> {
    players
        .iter()
        .filter_map(|player| map.player_stats.get(player))
        .filter_map(|stats| stats.hero_id.clone())
        .take(OVERLAY_HERO_SLOTS)
        .collect()
}

impl SubscriberView for BroadcastOverlayView {
    type Rendered = Option<OverlayFrame>;

    fn kind(&self) -> ViewKind {
        ViewKind::BroadcastOverlay
    }

    fn projection(&self) -> &Projection {
        &self.projection
    }

    fn projection_mut(&mut self) -> &mut Projection {
        &mut self.projection
    }

    fn render(&self) -> Self::Rendered {
        let state = self.projection.state()?;
        let current = state.current_map();

        Some(OverlayFrame {
            team1_name: state.team1.name.clone(),
            team2_name: state.team2.name.clone(),
            best_of: state.format.into(),
            series_score: state.series_score,
            live: state.status == MatchStatus::Live,
            current_map: current.map(|map| MapSummary {
                map_number: map.map_number,
                map_name: map.map_name.clone(),
                mode: map.mode.clone(),
                status: map.status,
                team1_score: map.team1_score,
                team2_score: map.team2_score,
                winner: map.winner,
            }),
            hero_picks: current
                .map(|map| HeroPicks {
                    team1: picks_for(map, &state.team1.players),
                    team2: picks_for(map, &state.team2.players),
                })
                .unwrap_or_default(),
            stale: self.projection.freshness() == Freshness::Stale,
        })
    }
}
