use crate::models::{MatchState, UpdateDelta};
use crate::service::sync_fault::SyncFault;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Outcome of offering one delta to a projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Applied, possibly together with buffered successors
    Applied { through: u64, count: usize },
    /// Already applied; discarded
    Duplicate { sequence: u64 },
    /// Delta belongs to another match
    Foreign,
    /// Arrived ahead of a gap; held until `missing_from..=missing_to` arrives
    Buffered { missing_from: u64, missing_to: u64 },
    /// Gap too wide to wait out; the projection must be rebuilt
    ResyncRequired(SyncFault),
}

/// Folds a possibly out-of-order, possibly duplicated delta stream into a
/// projection in strict sequence order. Ordering, not wall-clock time, decides
/// which write wins.
#[derive(Debug, Clone)]
pub struct ReconciliationPolicy {
    last_applied: u64,
    pending: BTreeMap<u64, UpdateDelta>,
    reorder_window: usize,
}

impl ReconciliationPolicy {
    pub fn new(reorder_window: usize) -> Self {
        Self {
            last_applied: 0,
            pending: BTreeMap::new(),
            reorder_window: reorder_window.max(1),
        }
    }

    pub fn last_applied_sequence(&self) -> u64 {
        self.last_applied
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// First missing sequence and the last one before the buffered run
    pub fn missing_range(&self) -> Option<(u64, u64)> {
        self.pending
            .keys()
            .next()
            .map(|first| (self.last_applied + 1, first - 1))
    }

    /// Hold a delta without applying it (no base state yet)
    pub fn hold(&mut self, delta: UpdateDelta) -> Reconciled {
        if delta.sequence <= self.last_applied {
            return Reconciled::Duplicate {
                sequence: delta.sequence,
            };
        }
        self.pending.entry(delta.sequence).or_insert(delta);
        self.overflow_or_buffered()
    }

    pub fn accept(&mut self, delta: UpdateDelta, state: &mut MatchState) -> Reconciled {
        if delta.match_id != state.match_id {
            warn!(
                expected = %state.match_id,
                received = %delta.match_id,
                "Dropping delta for another match"
            );
            return Reconciled::Foreign;
        }

        if delta.sequence <= self.last_applied {
            debug!(sequence = delta.sequence, "Duplicate delta discarded");
            return Reconciled::Duplicate {
                sequence: delta.sequence,
            };
        }

        if delta.sequence == self.last_applied + 1 {
            delta.change.apply_to(state);
            self.last_applied = delta.sequence;
            let count = 1 + self.drain(state);
            return Reconciled::Applied {
                through: self.last_applied,
                count,
            };
        }

        self.pending.entry(delta.sequence).or_insert(delta);
        self.overflow_or_buffered()
    }

    /// Adopt a snapshot's sequence as the new base and apply whatever buffered
    /// deltas now follow it. Returns how many were applied.
    pub fn rebase(&mut self, sequence: u64, state: &mut MatchState) -> usize {
        self.last_applied = sequence;
        self.pending.retain(|buffered, _| *buffered > sequence);
        self.drain(state)
    }

    fn drain(&mut self, state: &mut MatchState) -> usize {
        let mut applied = 0;
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.last_applied + 1 {
                break;
            }
            let delta = entry.remove();
            delta.change.apply_to(state);
            self.last_applied = delta.sequence;
            applied += 1;
        }
        applied
    }

    fn overflow_or_buffered(&mut self) -> Reconciled {
        if self.pending.len() > self.reorder_window {
            let received = self.pending.keys().next_back().copied().unwrap_or_default();
            self.pending.clear();
            return Reconciled::ResyncRequired(SyncFault::SequenceGap {
                expected: self.last_applied + 1,
                received,
            });
        }

        match self.missing_range() {
            Some((missing_from, missing_to)) => Reconciled::Buffered {
                missing_from,
                missing_to,
            },
            None => Reconciled::Applied {
                through: self.last_applied,
                count: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn state() -> MatchState {
        MatchState::new(
            Uuid::new_v4(),
            MatchFormat::best_of(3).unwrap(),
            TeamRoster {
                name: "Alpha".to_string(),
                players: vec![1],
            },
            TeamRoster {
                name: "Bravo".to_string(),
                players: vec![2],
            },
            vec![],
            Utc::now(),
        )
    }

    fn score(state: &MatchState, sequence: u64) -> UpdateDelta {
        UpdateDelta {
            match_id: state.match_id,
            sequence,
            timestamp: Utc::now(),
            change: DeltaChange::MapScore {
                map_index: 0,
                team1_score: sequence as u32,
                team2_score: 0,
            },
        }
    }

    #[test]
    fn test_in_order_deltas_apply() {
        let mut state = state();
        let mut policy = ReconciliationPolicy::new(8);

        assert_eq!(
            policy.accept(score(&state, 1), &mut state),
            Reconciled::Applied { through: 1, count: 1 }
        );
        assert_eq!(
            policy.accept(score(&state, 2), &mut state),
            Reconciled::Applied { through: 2, count: 1 }
        );
        assert_eq!(state.maps[0].team1_score, 2);
    }

    #[test]
    fn test_duplicate_is_discarded() {
        let mut state = state();
        let mut policy = ReconciliationPolicy::new(8);
        let first = score(&state, 1);

        policy.accept(first.clone(), &mut state);
        let once = state.clone();
        assert_eq!(
            policy.accept(first, &mut state),
            Reconciled::Duplicate { sequence: 1 }
        );
        assert_eq!(state, once);
    }

    #[test]
    fn test_out_of_order_is_buffered_until_gap_fills() {
        let mut state = state();
        let mut policy = ReconciliationPolicy::new(8);

        assert_eq!(
            policy.accept(score(&state, 3), &mut state),
            Reconciled::Buffered {
                missing_from: 1,
                missing_to: 2
            }
        );
        assert_eq!(
            policy.accept(score(&state, 2), &mut state),
            Reconciled::Buffered {
                missing_from: 1,
                missing_to: 1
            }
        );
        assert_eq!(state.maps[0].team1_score, 0);

        assert_eq!(
            policy.accept(score(&state, 1), &mut state),
            Reconciled::Applied { through: 3, count: 3 }
        );
        assert_eq!(state.maps[0].team1_score, 3);
        assert_eq!(policy.pending_len(), 0);
    }

    #[test]
    fn test_gap_wider_than_window_requires_resync() {
        let mut state = state();
        let mut policy = ReconciliationPolicy::new(2);

        policy.accept(score(&state, 5), &mut state);
        policy.accept(score(&state, 6), &mut state);
        let outcome = policy.accept(score(&state, 7), &mut state);

        assert_eq!(
            outcome,
            Reconciled::ResyncRequired(SyncFault::SequenceGap {
                expected: 1,
                received: 7
            })
        );
        assert_eq!(policy.pending_len(), 0);
    }

    #[test]
    fn test_rebase_drains_buffered_successors() {
        let mut state = state();
        let mut policy = ReconciliationPolicy::new(8);
        policy.accept(score(&state, 5), &mut state);
        policy.accept(score(&state, 6), &mut state);
        policy.accept(score(&state, 3), &mut state);

        // Snapshot taken at sequence 4 covers the gap
        let applied = policy.rebase(4, &mut state);

        assert_eq!(applied, 2);
        assert_eq!(policy.last_applied_sequence(), 6);
        assert_eq!(policy.pending_len(), 0);
        assert_eq!(state.maps[0].team1_score, 6);
    }

    #[test]
    fn test_foreign_match_is_ignored() {
        let mut state = state();
        let mut policy = ReconciliationPolicy::new(8);
        let mut delta = score(&state, 1);
        delta.match_id = Uuid::new_v4();

        assert_eq!(policy.accept(delta, &mut state), Reconciled::Foreign);
        assert_eq!(policy.last_applied_sequence(), 0);
    }
}
