//! Durable record of every committed mutation.
//!
//! A match is stored as its latest snapshot plus the deltas committed after
//! it. Restoring replays those deltas through the same fold the subscribers
//! use, so a restarted store resumes at the last committed sequence.

use crate::db::DbPool;
use crate::models::{DeltaChange, MatchSnapshot, MatchState, UpdateDelta};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sequence {sequence} already recorded or out of order for match {match_id}")]
    SequenceConflict { match_id: Uuid, sequence: u64 },

    #[error("No snapshot recorded for match {0}")]
    MissingSnapshot(Uuid),
}

/// Latest snapshot and the deltas committed after it
#[derive(Debug, Clone)]
pub struct StoredMatch {
    pub snapshot: MatchSnapshot,
    pub deltas: Vec<UpdateDelta>,
}

impl StoredMatch {
    /// Fold the trailing deltas into the snapshot
    pub fn replay(self) -> MatchSnapshot {
        let StoredMatch { snapshot, deltas } = self;
        let mut state = snapshot.state;
        let mut sequence = snapshot.sequence;
        for delta in deltas {
            if delta.sequence != sequence + 1 {
                break;
            }
            delta.change.apply_to(&mut state);
            sequence = delta.sequence;
        }
        MatchSnapshot { state, sequence }
    }

    fn last_sequence(&self) -> u64 {
        self.deltas
            .last()
            .map(|delta| delta.sequence)
            .unwrap_or(self.snapshot.sequence)
    }
}

pub enum Journal {
    Memory(InMemoryJournal),
    Postgres(PgJournal),
}

impl Journal {
    pub fn in_memory() -> Self {
        Journal::Memory(InMemoryJournal::default())
    }

    pub fn postgres(pool: DbPool) -> Self {
        Journal::Postgres(PgJournal { pool })
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Journal::Memory(_) => "memory",
            Journal::Postgres(_) => "postgres",
        }
    }

    pub async fn save_snapshot(&self, snapshot: &MatchSnapshot) -> Result<(), JournalError> {
        match self {
            Journal::Memory(journal) => journal.save_snapshot(snapshot).await,
            Journal::Postgres(journal) => journal.save_snapshot(snapshot).await,
        }
    }

    pub async fn append(&self, delta: &UpdateDelta) -> Result<(), JournalError> {
        match self {
            Journal::Memory(journal) => journal.append(delta).await,
            Journal::Postgres(journal) => journal.append(delta).await,
        }
    }

    pub async fn load(&self, match_id: Uuid) -> Result<Option<StoredMatch>, JournalError> {
        match self {
            Journal::Memory(journal) => journal.load(match_id).await,
            Journal::Postgres(journal) => journal.load(match_id).await,
        }
    }
}

/// Process-local journal, used when no database is configured and in tests
#[derive(Default)]
pub struct InMemoryJournal {
    matches: RwLock<HashMap<Uuid, StoredMatch>>,
}

impl InMemoryJournal {
    async fn save_snapshot(&self, snapshot: &MatchSnapshot) -> Result<(), JournalError> {
        let mut matches = self.matches.write().await;
        let entry = matches
            .entry(snapshot.state.match_id)
            .or_insert_with(|| StoredMatch {
                snapshot: snapshot.clone(),
                deltas: Vec::new(),
            });
        if snapshot.sequence >= entry.snapshot.sequence {
            entry.snapshot = snapshot.clone();
            entry.deltas.retain(|delta| delta.sequence > snapshot.sequence);
        }
        Ok(())
    }

    async fn append(&self, delta: &UpdateDelta) -> Result<(), JournalError> {
        let mut matches = self.matches.write().await;
        let entry = matches
            .get_mut(&delta.match_id)
            .ok_or(JournalError::MissingSnapshot(delta.match_id))?;
        if delta.sequence != entry.last_sequence() + 1 {
            return Err(JournalError::SequenceConflict {
                match_id: delta.match_id,
                sequence: delta.sequence,
            });
        }
        entry.deltas.push(delta.clone());
        Ok(())
    }

    async fn load(&self, match_id: Uuid) -> Result<Option<StoredMatch>, JournalError> {
        Ok(self.matches.read().await.get(&match_id).cloned())
    }
}

pub struct PgJournal {
    pool: DbPool,
}

impl PgJournal {
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn save_snapshot(&self, snapshot: &MatchSnapshot) -> Result<(), JournalError> {
        let match_id = snapshot.state.match_id;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO match_snapshots (match_id, sequence, state, taken_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (match_id) DO UPDATE
            SET sequence = EXCLUDED.sequence,
                state = EXCLUDED.state,
                taken_at = EXCLUDED.taken_at
            WHERE match_snapshots.sequence <= EXCLUDED.sequence
            "#,
        )
        .bind(match_id)
        .bind(snapshot.sequence as i64)
        .bind(Json(&snapshot.state))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM match_deltas WHERE match_id = $1 AND sequence <= $2")
            .bind(match_id)
            .bind(snapshot.sequence as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(match_id = %match_id, sequence = snapshot.sequence, "Snapshot persisted");
        Ok(())
    }

    async fn append(&self, delta: &UpdateDelta) -> Result<(), JournalError> {
        let result = sqlx::query(
            r#"
            INSERT INTO match_deltas (match_id, sequence, recorded_at, change)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(delta.match_id)
        .bind(delta.sequence as i64)
        .bind(delta.timestamp)
        .bind(Json(&delta.change))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(JournalError::SequenceConflict {
                    match_id: delta.match_id,
                    sequence: delta.sequence,
                })
            }
            Err(e) => Err(JournalError::Database(e)),
        }
    }

    async fn load(&self, match_id: Uuid) -> Result<Option<StoredMatch>, JournalError> {
        let snapshot = sqlx::query_as::<_, (i64, Json<MatchState>)>(
            "SELECT sequence, state FROM match_snapshots WHERE match_id = $1",
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((sequence, Json(state))) = snapshot else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, (i64, DateTime<Utc>, Json<DeltaChange>)>(
            r#"
            SELECT sequence, recorded_at, change
            FROM match_deltas
            WHERE match_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(match_id)
        .bind(sequence)
        .fetch_all(&self.pool)
        .await?;

        let deltas = rows
            .into_iter()
            .map(|(sequence, timestamp, Json(change))| UpdateDelta {
                match_id,
                sequence: sequence as u64,
                timestamp,
                change,
            })
            .collect();

        Ok(Some(StoredMatch {
            snapshot: MatchSnapshot {
                state,
                sequence: sequence as u64,
            },
            deltas,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;

    fn snapshot() -> MatchSnapshot {
        MatchSnapshot {
            state: MatchState::new(
                Uuid::new_v4(),
                MatchFormat::best_of(1).unwrap(),
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
            ),
            sequence: 0,
        }
    }

    fn timer(match_id: Uuid, sequence: u64) -> UpdateDelta {
        UpdateDelta {
            match_id,
            sequence,
            timestamp: Utc::now(),
            change: DeltaChange::Timer {
                timer: MatchTimer {
                    elapsed_secs: sequence * 10,
                    running: true,
                },
            },
        }
    }

    #[tokio::test]
    async fn test_memory_journal_replays_to_last_sequence() {
        let journal = Journal::in_memory();
        let snapshot = snapshot();
        let id = snapshot.state.match_id;
        journal.save_snapshot(&snapshot).await.unwrap();
        journal.append(&timer(id, 1)).await.unwrap();
        journal.append(&timer(id, 2)).await.unwrap();

        let restored = journal.load(id).await.unwrap().unwrap().replay();
        assert_eq!(restored.sequence, 2);
        assert_eq!(restored.state.timer.elapsed_secs, 20);
    }

    #[tokio::test]
    async fn test_memory_journal_rejects_out_of_order_append() {
        let journal = Journal::in_memory();
        let snapshot = snapshot();
        let id = snapshot.state.match_id;
        journal.save_snapshot(&snapshot).await.unwrap();
        journal.append(&timer(id, 1)).await.unwrap();

        assert!(matches!(
            journal.append(&timer(id, 1)).await,
            Err(JournalError::SequenceConflict { sequence: 1, .. })
        ));
        assert!(matches!(
            journal.append(&timer(id, 3)).await,
            Err(JournalError::SequenceConflict { sequence: 3, .. })
        ));
        assert!(matches!(
            journal.append(&timer(Uuid::new_v4(), 1)).await,
            Err(JournalError::MissingSnapshot(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_compacts_older_deltas() {
        let journal = Journal::in_memory();
        let snapshot = snapshot();
        let id = snapshot.state.match_id;
        journal.save_snapshot(&snapshot).await.unwrap();
        for sequence in 1..=3 {
            journal.append(&timer(id, sequence)).await.unwrap();
        }

        let compacted = journal.load(id).await.unwrap().unwrap().replay();
        journal.save_snapshot(&compacted).await.unwrap();
        journal.append(&timer(id, 4)).await.unwrap();

        let stored = journal.load(id).await.unwrap().unwrap();
        assert_eq!(stored.snapshot.sequence, 3);
        assert_eq!(stored.deltas.len(), 1);
        assert_eq!(stored.replay().state.timer.elapsed_secs, 40);
    }

    #[tokio::test]
    async fn test_unknown_match_loads_nothing() {
        let journal = Journal::in_memory();
        assert!(journal.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}
