#[cfg(test)]
mod tests {
    use crate::models::*;
    use crate::service::journal::Journal;
    use crate::service::match_state_store::{MatchStateError, MatchStateStore};
    use crate::service::update_channel::ChannelConfig;
    use chrono::Utc;
    use std::sync::Arc;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    /// Helper to build a match with two three-player rosters
    fn new_match(best_of: u8) -> MatchState {
        MatchState::new(
            Uuid::new_v4(),
            MatchFormat::best_of(best_of).unwrap(),
            TeamRoster {
                name: "Alpha".to_string(),
                players: vec![1, 2, 3],
            },
            TeamRoster {
                name: "Bravo".to_string(),
                players: vec![4, 5, 6],
            },
            vec![MapSetup {
                map_name: "Tokyo 2099".to_string(),
                mode: "Convoy".to_string(),
            }],
            Utc::now(),
        )
    }

    async fn create_store(best_of: u8) -> (MatchStateStore, Arc<Journal>) {
        let journal = Arc::new(Journal::in_memory());
        let store = MatchStateStore::create(new_match(best_of), journal.clone(), ChannelConfig::default())
            .await
            .unwrap();
        (store, journal)
    }

    async fn live_store(best_of: u8) -> MatchStateStore {
        let (store, _) = create_store(best_of).await;
        store.transition_status(MatchStatus::Live).await.unwrap();
        store
    }

    async fn finish_map(store: &MatchStateStore, map_index: usize, winner: TeamSide) -> UpdateDelta {
        store
            .transition_map_status(map_index, MapStatus::Completed, Some(winner))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_store_starts_at_sequence_zero() {
        let (store, _) = create_store(3).await;
        let snapshot = store.snapshot().await;

        assert_eq!(snapshot.sequence, 0);
        assert_eq!(snapshot.state.status, MatchStatus::Upcoming);
        assert_eq!(snapshot.state.maps.len(), 3);
        assert_eq!(snapshot.state.maps[0].map_name, "Tokyo 2099");
        assert_eq!(snapshot.state.maps[2].map_name, "Map 3");
    }

    #[tokio::test]
    async fn test_sequences_increase_by_one() {
        let store = live_store(3).await;
        let mut sequences = vec![1];

        for _ in 0..5 {
            sequences.push(store.apply_score_update(0, 1, 0).await.unwrap().sequence);
        }
        sequences.push(store.set_timer(120, true).await.unwrap().sequence);

        assert_eq!(sequences, (1..=7).collect::<Vec<u64>>());
        assert_eq!(store.snapshot().await.sequence, 7);
    }

    #[tokio::test]
    async fn test_going_live_opens_first_map() {
        let store = live_store(3).await;
        let state = store.snapshot().await.state;

        assert_eq!(state.status, MatchStatus::Live);
        assert_eq!(state.maps[0].status, MapStatus::Ongoing);
        assert_eq!(state.maps[1].status, MapStatus::Upcoming);
    }

    #[tokio::test]
    async fn test_player_stats_are_isolated_per_map() {
        let store = live_store(3).await;
        store
            .apply_player_stat_update(
                0,
                1,
                PlayerStatChange::Increment {
                    field: StatField::Eliminations,
                    amount: 5,
                },
            )
            .await
            .unwrap();

        let state = store.snapshot().await.state;
        assert_eq!(state.maps[0].player_stats[&1].eliminations, 5);
        assert_eq!(state.maps[1].player_stats[&1].eliminations, 0);
        assert_eq!(state.maps[2].player_stats[&1].eliminations, 0);
    }

    #[tokio::test]
    async fn test_stat_increments_accumulate() {
        let store = live_store(1).await;
        for amount in [3, 4] {
            store
                .apply_player_stat_update(
                    0,
                    5,
                    PlayerStatChange::Increment {
                        field: StatField::Damage,
                        amount,
                    },
                )
                .await
                .unwrap();
        }

        let delta = store
            .apply_player_stat_update(
                0,
                5,
                PlayerStatChange::Increment {
                    field: StatField::Damage,
                    amount: 1000,
                },
            )
            .await
            .unwrap();

        // Deltas carry the value after the mutation
        assert!(matches!(
            delta.change,
            DeltaChange::PlayerStat { value: 1007, .. }
        ));
    }

    #[tokio::test]
    async fn test_hero_swaps_are_recorded() {
        let store = live_store(1).await;
        for hero in ["magik", "psylocke"] {
            store
                .apply_player_stat_update(
                    0,
                    2,
                    PlayerStatChange::Hero {
                        hero_id: hero.to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let map = store.snapshot().await.state.maps[0].clone();
        assert_eq!(map.player_stats[&2].hero_id.as_deref(), Some("psylocke"));
        assert_eq!(map.hero_swaps.len(), 2);
        assert_eq!(map.hero_swaps[1].previous_hero.as_deref(), Some("magik"));
    }

    #[tokio::test]
    async fn test_best_of_three_end_to_end() {
        let store = live_store(3).await;

        store.apply_score_update(0, 13, 7).await.unwrap();
        finish_map(&store, 0, TeamSide::Team1).await;

        store.apply_score_update(1, 9, 13).await.unwrap();
        finish_map(&store, 1, TeamSide::Team2).await;

        store.apply_score_update(2, 13, 11).await.unwrap();
        let last = finish_map(&store, 2, TeamSide::Team1).await;

        assert!(last.completes_match());
        let state = store.snapshot().await.state;
        assert_eq!(
            state.series_score,
            SeriesScore {
                team1_wins: 2,
                team2_wins: 1
            }
        );
        assert_eq!(state.status, MatchStatus::Completed);
        assert_eq!(
            (state.maps[1].team1_score, state.maps[1].team2_score),
            (9, 13)
        );
    }

    #[tokio::test]
    async fn test_clinched_series_locks_the_match() {
        let store = live_store(3).await;
        store.apply_score_update(0, 13, 0).await.unwrap();
        finish_map(&store, 0, TeamSide::Team1).await;
        store.apply_score_update(1, 13, 0).await.unwrap();
        finish_map(&store, 1, TeamSide::Team1).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.state.status, MatchStatus::Completed);
        assert_eq!(snapshot.state.maps[2].status, MapStatus::Upcoming);

        assert_eq!(
            store.apply_score_update(2, 1, 0).await,
            Err(MatchStateError::MatchCompleted)
        );
        assert_eq!(
            store.set_timer(0, false).await,
            Err(MatchStateError::MatchCompleted)
        );
        assert!(matches!(
            store.transition_status(MatchStatus::Live).await,
            Err(MatchStateError::InvalidTransition { .. })
        ));
        assert_eq!(store.snapshot().await, snapshot);
    }

    #[tokio::test]
    async fn test_completing_a_map_opens_the_next() {
        let store = live_store(5).await;
        store.apply_score_update(0, 2, 0).await.unwrap();
        let delta = finish_map(&store, 0, TeamSide::Team1).await;

        assert!(!delta.completes_match());
        let state = store.snapshot().await.state;
        assert_eq!(state.current_map_index, 1);
        assert_eq!(state.maps[1].status, MapStatus::Ongoing);
        assert_eq!(state.series_score.team1_wins, 1);
    }

    #[tokio::test]
    async fn test_invalid_map_index_is_rejected() {
        let store = live_store(3).await;
        assert_eq!(
            store.apply_score_update(3, 1, 0).await,
            Err(MatchStateError::InvalidMapIndex {
                index: 3,
                map_count: 3
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_player_is_rejected() {
        let store = live_store(3).await;
        let result = store
            .apply_player_stat_update(
                0,
                99,
                PlayerStatChange::Increment {
                    field: StatField::Deaths,
                    amount: 1,
                },
            )
            .await;
        assert_eq!(result, Err(MatchStateError::UnknownPlayer(99)));
    }

    #[tokio::test]
    async fn test_updates_require_an_ongoing_map() {
        let (store, _) = create_store(3).await;
        assert!(matches!(
            store.apply_score_update(0, 1, 0).await,
            Err(MatchStateError::InvalidState(_))
        ));

        store.transition_status(MatchStatus::Live).await.unwrap();
        assert!(matches!(
            store.apply_score_update(1, 1, 0).await,
            Err(MatchStateError::InvalidState(_))
        ));
        assert!(matches!(
            store.apply_score_update(0, 0, 0).await,
            Err(MatchStateError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_status_transitions() {
        let (store, _) = create_store(3).await;

        assert!(matches!(
            store.transition_status(MatchStatus::Paused).await,
            Err(MatchStateError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.transition_status(MatchStatus::Upcoming).await,
            Err(MatchStateError::InvalidTransition { .. })
        ));

        store.transition_status(MatchStatus::Live).await.unwrap();
        store.transition_status(MatchStatus::Paused).await.unwrap();
        store.transition_status(MatchStatus::Live).await.unwrap();
        assert_eq!(store.snapshot().await.sequence, 3);
    }

    #[tokio::test]
    async fn test_map_transition_rules() {
        let store = live_store(3).await;

        assert!(matches!(
            store
                .transition_map_status(1, MapStatus::Ongoing, None)
                .await,
            Err(MatchStateError::InvalidState(_))
        ));
        assert!(matches!(
            store
                .transition_map_status(0, MapStatus::Completed, None)
                .await,
            Err(MatchStateError::InvalidState(_))
        ));
        assert!(matches!(
            store
                .transition_map_status(0, MapStatus::Upcoming, None)
                .await,
            Err(MatchStateError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_state_untouched() {
        let store = live_store(3).await;
        let before = store.snapshot().await;

        let _ = store.apply_score_update(7, 1, 0).await;
        let _ = store.correct_map_score(2, 1, 1).await;

        assert_eq!(store.snapshot().await, before);
        assert_eq!(store.channel().latest_sequence(), before.sequence);
    }

    #[tokio::test]
    async fn test_correction_may_lower_scores() {
        let store = live_store(3).await;
        store.apply_score_update(0, 5, 5).await.unwrap();
        store.correct_map_score(0, 3, 5).await.unwrap();

        let map = store.snapshot().await.state.maps[0].clone();
        assert_eq!((map.team1_score, map.team2_score), (3, 5));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_serialized() {
        let store = Arc::new(live_store(1).await);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.apply_score_update(0, 1, 0).await.unwrap().sequence
            }));
        }

        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap());
        }
        sequences.sort_unstable();

        assert_eq!(sequences, (2..=51).collect::<Vec<u64>>());
        assert_eq!(store.snapshot().await.state.maps[0].team1_score, 50);
    }

    #[tokio::test]
    async fn test_published_deltas_match_commits() {
        let store = live_store(3).await;
        let mut subscription = store.channel().subscribe(1).unwrap();

        let committed = store.apply_score_update(0, 2, 1).await.unwrap();
        let received = subscription.next().await.unwrap().unwrap();

        assert_eq!(received, committed);
    }

    #[tokio::test]
    async fn test_store_restores_from_journal() {
        let (store, journal) = create_store(3).await;
        store.transition_status(MatchStatus::Live).await.unwrap();
        store.apply_score_update(0, 4, 2).await.unwrap();
        let before = store.snapshot().await;
        let match_id = store.match_id();
        drop(store);

        let stored = journal.load(match_id).await.unwrap().unwrap();
        let restored = MatchStateStore::restore(stored.replay(), journal, ChannelConfig::default());

        assert_eq!(restored.snapshot().await, before);
        let next = restored.apply_score_update(0, 1, 0).await.unwrap();
        assert_eq!(next.sequence, before.sequence + 1);
    }
}
