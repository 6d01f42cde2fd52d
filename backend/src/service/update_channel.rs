//! Per-match fan-out of sequenced deltas.
//!
//! The channel keeps a bounded replay buffer (last `buffer_capacity` deltas,
//! none older than `retention`) next to a `tokio::sync::broadcast` ring.
//! Late joiners and reconnecting subscribers replay from the buffer, then
//! follow the broadcast. Publishing never waits on subscribers; one that
//! falls behind the ring receives [`SyncFault::Lagged`] and must resync from a
//! snapshot.

use crate::models::UpdateDelta;
use crate::service::sync_fault::SyncFault;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub buffer_capacity: usize,
    pub retention: Duration,
    pub broadcast_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            retention: Duration::from_secs(300),
            broadcast_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct ReplayBuffer {
    deltas: VecDeque<UpdateDelta>,
    latest_sequence: u64,
    final_sequence: Option<u64>,
}

impl ReplayBuffer {
    fn evict(&mut self, config: &ChannelConfig) {
        while self.deltas.len() > config.buffer_capacity {
            self.deltas.pop_front();
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(config.retention.as_secs() as i64);
        while self
            .deltas
            .front()
            .is_some_and(|delta| delta.timestamp < cutoff)
        {
            self.deltas.pop_front();
        }
    }

    fn since(&self, sequence: u64) -> Result<Vec<UpdateDelta>, SyncFault> {
        if sequence >= self.latest_sequence {
            return Ok(Vec::new());
        }

        let oldest = self
            .deltas
            .front()
            .map(|delta| delta.sequence)
            .unwrap_or(self.latest_sequence + 1);
        if sequence + 1 < oldest {
            return Err(SyncFault::BackfillUnavailable {
                requested: sequence + 1,
                oldest,
            });
        }

        Ok(self
            .deltas
            .iter()
            .filter(|delta| delta.sequence > sequence)
            .cloned()
            .collect())
    }
}

pub struct UpdateChannel {
    match_id: Uuid,
    config: ChannelConfig,
    buffer: RwLock<ReplayBuffer>,
    tx: broadcast::Sender<UpdateDelta>,
}

impl UpdateChannel {
    /// Create a channel whose history starts after `start_sequence`
    pub fn new(match_id: Uuid, config: ChannelConfig, start_sequence: u64) -> Self {
        let (tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            match_id,
            config,
            buffer: RwLock::new(ReplayBuffer {
                latest_sequence: start_sequence,
                ..ReplayBuffer::default()
            }),
            tx,
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    /// Buffer and fan out a delta. Never blocks on subscriber speed.
    pub fn publish(&self, delta: UpdateDelta) {
        let mut buffer = self.write_buffer();
        if delta.sequence <= buffer.latest_sequence {
            warn!(
                match_id = %self.match_id,
                sequence = delta.sequence,
                latest = buffer.latest_sequence,
                "Ignoring stale publish"
            );
            return;
        }

        buffer.latest_sequence = delta.sequence;
        if delta.completes_match() {
            buffer.final_sequence = Some(delta.sequence);
        }
        buffer.deltas.push_back(delta.clone());
        buffer.evict(&self.config);

        // Sent under the lock so buffer order and broadcast order agree
        let receivers = self.tx.send(delta).unwrap_or(0);
        debug!(
            match_id = %self.match_id,
            sequence = buffer.latest_sequence,
            receivers,
            "Delta published"
        );
    }

    /// Buffered deltas with `sequence > since`, for polling and gap repair
    pub fn deltas_since(&self, since: u64) -> Result<Vec<UpdateDelta>, SyncFault> {
        self.read_buffer().since(since)
    }

    /// Lazy stream of deltas after `from_sequence`: backlog first, then live.
    /// Ends once the delta that completes the match has been yielded.
    pub fn subscribe(&self, from_sequence: u64) -> Result<DeltaSubscription, SyncFault> {
        // Receiver first, so nothing published while reading the backlog is lost
        let rx = self.tx.subscribe();
        let buffer = self.read_buffer();
        let backlog = buffer.since(from_sequence)?;
        let finished = buffer
            .final_sequence
            .is_some_and(|last| from_sequence >= last);

        debug!(
            match_id = %self.match_id,
            from_sequence,
            backlog = backlog.len(),
            "Subscriber attached"
        );

        Ok(DeltaSubscription {
            match_id: self.match_id,
            backlog: backlog.into(),
            live: BroadcastStream::new(rx),
            last_sequence: from_sequence,
            finished,
        })
    }

    pub fn latest_sequence(&self) -> u64 {
        self.read_buffer().latest_sequence
    }

    pub fn is_closed(&self) -> bool {
        self.read_buffer().final_sequence.is_some()
    }

    pub fn buffered_len(&self) -> usize {
        self.read_buffer().deltas.len()
    }

    /// Active subscriptions; dropped subscriptions are released immediately
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn read_buffer(&self) -> RwLockReadGuard<'_, ReplayBuffer> {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_buffer(&self) -> RwLockWriteGuard<'_, ReplayBuffer> {
        self.buffer.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cancellable subscription. Dropping it releases the broadcast slot.
pub struct DeltaSubscription {
    match_id: Uuid,
    backlog: VecDeque<UpdateDelta>,
    live: BroadcastStream<UpdateDelta>,
    last_sequence: u64,
    finished: bool,
}

impl DeltaSubscription {
    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    fn emit(&mut self, delta: UpdateDelta) -> Poll<Option<Result<UpdateDelta, SyncFault>>> {
        self.last_sequence = delta.sequence;
        if delta.completes_match() {
            self.finished = true;
        }
        Poll::Ready(Some(Ok(delta)))
    }
}

impl Stream for DeltaSubscription {
    type Item = Result<UpdateDelta, SyncFault>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(delta) = this.backlog.pop_front() {
            return this.emit(delta);
        }

        loop {
            match Pin::new(&mut this.live).poll_next(cx) {
                Poll::Ready(Some(Ok(delta))) => {
                    // Already yielded from the backlog
                    if delta.sequence <= this.last_sequence {
                        continue;
                    }
                    return this.emit(delta);
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(
                        match_id = %this.match_id,
                        last_sequence = this.last_sequence,
                        skipped,
                        "Subscriber lagged behind broadcast"
                    );
                    this.finished = true;
                    return Poll::Ready(Some(Err(SyncFault::Lagged { skipped })));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeltaChange, MatchStatus};
    use chrono::Utc;
    use tokio_stream::StreamExt;
    use tokio_test::{assert_pending, assert_ready, task};

    fn delta(match_id: Uuid, sequence: u64) -> UpdateDelta {
        UpdateDelta {
            match_id,
            sequence,
            timestamp: Utc::now(),
            change: DeltaChange::MapScore {
                map_index: 0,
                team1_score: sequence as u32,
                team2_score: 0,
            },
        }
    }

    fn completing(match_id: Uuid, sequence: u64) -> UpdateDelta {
        UpdateDelta {
            match_id,
            sequence,
            timestamp: Utc::now(),
            change: DeltaChange::MatchStatus {
                status: MatchStatus::Completed,
                started_map: None,
            },
        }
    }

    fn channel(capacity: usize) -> UpdateChannel {
        UpdateChannel::new(
            Uuid::new_v4(),
            ChannelConfig {
                buffer_capacity: capacity,
                ..ChannelConfig::default()
            },
            0,
        )
    }

    #[test]
    fn test_buffer_is_bounded() {
        let channel = channel(4);
        for sequence in 1..=10 {
            channel.publish(delta(channel.match_id(), sequence));
        }

        assert_eq!(channel.buffered_len(), 4);
        assert_eq!(channel.latest_sequence(), 10);

        let tail = channel.deltas_since(7).unwrap();
        assert_eq!(
            tail.iter().map(|d| d.sequence).collect::<Vec<_>>(),
            vec![8, 9, 10]
        );
        assert_eq!(
            channel.deltas_since(2),
            Err(SyncFault::BackfillUnavailable {
                requested: 3,
                oldest: 7
            })
        );
        assert!(channel.deltas_since(10).unwrap().is_empty());
    }

    #[test]
    fn test_stale_publish_is_ignored() {
        let channel = channel(8);
        channel.publish(delta(channel.match_id(), 1));
        channel.publish(delta(channel.match_id(), 2));
        channel.publish(delta(channel.match_id(), 2));
        channel.publish(delta(channel.match_id(), 1));

        assert_eq!(channel.buffered_len(), 2);
    }

    #[test]
    fn test_expired_deltas_are_evicted() {
        let channel = UpdateChannel::new(
            Uuid::new_v4(),
            ChannelConfig {
                retention: Duration::from_secs(60),
                ..ChannelConfig::default()
            },
            0,
        );
        let mut old = delta(channel.match_id(), 1);
        old.timestamp = Utc::now() - chrono::Duration::seconds(120);
        channel.publish(old);
        channel.publish(delta(channel.match_id(), 2));

        assert_eq!(channel.buffered_len(), 1);
        assert!(channel.deltas_since(0).is_err());
        assert_eq!(channel.deltas_since(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_backlog_then_live() {
        let channel = channel(16);
        let id = channel.match_id();
        channel.publish(delta(id, 1));
        channel.publish(delta(id, 2));

        let mut sub = channel.subscribe(0).unwrap();
        channel.publish(delta(id, 3));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(sub.next().await.unwrap().unwrap().sequence);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(sub.last_sequence(), 3);
    }

    #[tokio::test]
    async fn test_stream_terminates_after_completion() {
        let channel = channel(16);
        let id = channel.match_id();
        let mut sub = channel.subscribe(0).unwrap();

        channel.publish(delta(id, 1));
        channel.publish(completing(id, 2));

        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 1);
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 2);
        assert!(sub.next().await.is_none());

        // Joining after the end replays what is left, then stops
        let mut late = channel.subscribe(1).unwrap();
        assert_eq!(late.next().await.unwrap().unwrap().sequence, 2);
        assert!(late.next().await.is_none());
        assert!(channel.subscribe(2).unwrap().next().await.is_none());
    }

    #[test]
    fn test_subscription_suspends_between_deltas() {
        let channel = channel(16);
        let id = channel.match_id();
        let mut sub = task::spawn(channel.subscribe(0).unwrap());

        assert_pending!(sub.poll_next());
        channel.publish(delta(id, 1));
        assert!(sub.is_woken());
        let item = assert_ready!(sub.poll_next());
        assert_eq!(item.unwrap().unwrap().sequence, 1);
        assert_pending!(sub.poll_next());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_to_resync() {
        let channel = UpdateChannel::new(
            Uuid::new_v4(),
            ChannelConfig {
                broadcast_capacity: 2,
                ..ChannelConfig::default()
            },
            0,
        );
        let id = channel.match_id();
        let mut sub = channel.subscribe(0).unwrap();
        for sequence in 1..=5 {
            channel.publish(delta(id, sequence));
        }

        match sub.next().await {
            Some(Err(SyncFault::Lagged { skipped })) => assert_eq!(skipped, 3),
            other => panic!("expected lag, got {:?}", other),
        }
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn test_dropped_subscription_releases_slot() {
        let channel = channel(16);
        let first = channel.subscribe(0).unwrap();
        let second = channel.subscribe(0).unwrap();
        assert_eq!(channel.subscriber_count(), 2);

        drop(first);
        assert_eq!(channel.subscriber_count(), 1);
        drop(second);
        assert_eq!(channel.subscriber_count(), 0);
    }
}
