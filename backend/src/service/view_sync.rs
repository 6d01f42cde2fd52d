//! Drives one [`SubscriberView`] from a transport's event stream.
//!
//! Recovery is always local to the view: a gap is first repaired from the
//! source's replay buffer, and if that range is gone (or the transport
//! failed) the projection is rebuilt from a fresh snapshot. Resync attempts
//! back off between tries; once they are exhausted the view is marked
//! [`Freshness::Stale`] and keeps serving its last good projection.

use crate::models::{MatchSnapshot, UpdateDelta};
use crate::service::match_state_store::MatchStateStore;
use crate::service::reconciliation::Reconciled;
use crate::service::subscriber_view::{Freshness, SubscriberView};
use crate::service::sync_fault::SyncFault;
use crate::service::transport::{RetryPolicy, TransportEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where a view fetches snapshots and missed delta ranges
#[allow(async_fn_in_trait)]
pub trait SyncSource {
    async fn load_snapshot(&self) -> Result<MatchSnapshot, SyncFault>;

    async fn backfill(&self, since: u64) -> Result<Vec<UpdateDelta>, SyncFault>;
}

impl SyncSource for MatchStateStore {
    async fn load_snapshot(&self) -> Result<MatchSnapshot, SyncFault> {
        Ok(self.snapshot().await)
    }

    async fn backfill(&self, since: u64) -> Result<Vec<UpdateDelta>, SyncFault> {
        self.channel().deltas_since(since)
    }
}

impl<T: SyncSource> SyncSource for std::sync::Arc<T> {
    async fn load_snapshot(&self) -> Result<MatchSnapshot, SyncFault> {
        T::load_snapshot(&**self).await
    }

    async fn backfill(&self, since: u64) -> Result<Vec<UpdateDelta>, SyncFault> {
        T::backfill(&**self, since).await
    }
}

pub struct ViewSync<V, S> {
    view: V,
    source: S,
    retry: RetryPolicy,
    resyncs: u64,
}

impl<V: SubscriberView, S: SyncSource> ViewSync<V, S> {
    pub fn new(view: V, source: S, retry: RetryPolicy) -> Self {
        Self {
            view,
            source,
            retry,
            resyncs: 0,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn into_view(self) -> V {
        self.view
    }

    /// Completed snapshot resyncs so far
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Load the initial projection
    pub async fn mount(&mut self) -> Result<(), SyncFault> {
        self.resync().await
    }

    pub async fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Snapshot(snapshot) => {
                self.view.on_snapshot(snapshot);
            }
            TransportEvent::Delta(delta) => {
                let sequence = delta.sequence;
                match self.view.on_delta(delta) {
                    Reconciled::Buffered {
                        missing_from,
                        missing_to,
                    } => {
                        debug!(
                            view = ?self.view.kind(),
                            missing_from,
                            missing_to,
                            "Gap detected, backfilling"
                        );
                        self.repair().await;
                    }
                    Reconciled::ResyncRequired(fault) => {
                        warn!(view = ?self.view.kind(), sequence, fault = %fault, "Reorder window overflowed");
                        let _ = self.resync().await;
                    }
                    Reconciled::Applied { .. }
                    | Reconciled::Duplicate { .. }
                    | Reconciled::Foreign => {}
                }
            }
            TransportEvent::Failure(fault) => {
                warn!(view = ?self.view.kind(), kind = fault.kind(), fault = %fault, "Transport failure");
                let _ = self.resync().await;
            }
        }
    }

    /// Consume events until the match completes or the transport goes away
    pub async fn run(self, events: mpsc::Receiver<TransportEvent>) -> V {
        self.run_observed(events, |_| {}).await
    }

    /// Like [`ViewSync::run`], calling `observe` after mounting and after
    /// every handled event
    pub async fn run_observed<F>(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut observe: F,
    ) -> V
    where
        F: FnMut(&V),
    {
        if self.view.projection().state().is_none() {
            let _ = self.mount().await;
        }
        observe(&self.view);

        loop {
            let projection = self.view.projection();
            if projection.is_completed() && !projection.has_gap() {
                info!(
                    view = ?self.view.kind(),
                    sequence = projection.sequence(),
                    "Match completed, view sync finished"
                );
                break;
            }

            let Some(event) = events.recv().await else {
                debug!(view = ?self.view.kind(), "Transport closed");
                break;
            };
            self.handle(event).await;
            observe(&self.view);
        }

        self.view
    }

    /// Fill the current gap from the replay buffer, or fall back to a snapshot
    async fn repair(&mut self) {
        let since = self.view.projection().sequence();
        match self.source.backfill(since).await {
            Ok(deltas) => {
                for delta in deltas {
                    if let Reconciled::ResyncRequired(_) = self.view.on_delta(delta) {
                        break;
                    }
                }
                if self.view.projection().has_gap() {
                    let _ = self.resync().await;
                }
            }
            Err(fault) => {
                debug!(view = ?self.view.kind(), fault = %fault, "Backfill unavailable");
                let _ = self.resync().await;
            }
        }
    }

    /// Replace the projection with a fresh snapshot, retrying with backoff
    async fn resync(&mut self) -> Result<(), SyncFault> {
        self.view.projection_mut().set_freshness(Freshness::Resyncing);

        let mut attempt = 0;
        loop {
            match self.source.load_snapshot().await {
                Ok(snapshot) => {
                    debug!(
                        view = ?self.view.kind(),
                        sequence = snapshot.sequence,
                        attempt,
                        "Resynced from snapshot"
                    );
                    self.view.on_snapshot(snapshot);
                    self.resyncs += 1;
                    return Ok(());
                }
                Err(fault) => {
                    attempt += 1;
                    if attempt >= self.retry.max_retries.max(1) {
                        warn!(
                            view = ?self.view.kind(),
                            attempts = attempt,
                            fault = %fault,
                            "Resync failed, data may be stale"
                        );
                        self.view.projection_mut().set_freshness(Freshness::Stale);
                        return Err(fault);
                    }
                    tokio::time::sleep(self.retry.delay(attempt - 1)).await;
                }
            }
        }
    }
}
