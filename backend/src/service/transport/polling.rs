//! HTTP polling fallback for clients that cannot hold a socket open.

use super::{RetryPolicy, TransportEvent, EVENT_QUEUE_CAPACITY};
use crate::api_error::ErrorResponse;
use crate::models::{DeltaBatch, MatchSnapshot, UpdateDelta};
use crate::service::sync_fault::{SyncFault, TransportFailure};
use crate::service::view_sync::SyncSource;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reads snapshots and delta ranges from the match HTTP API
#[derive(Clone)]
pub struct HttpSyncSource {
    client: Client,
    base_url: String,
    match_id: Uuid,
    timeout: Duration,
}

impl HttpSyncSource {
    pub fn new(base_url: &str, match_id: Uuid, timeout: Duration) -> Result<Self, TransportFailure> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            match_id,
            timeout,
        })
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub async fn fetch_snapshot(&self) -> Result<MatchSnapshot, SyncFault> {
        let url = format!("{}/api/matches/{}", self.base_url, self.match_id);
        let response = self.client.get(&url).send().await.map_err(|e| self.failure(e))?;

        if !response.status().is_success() {
            return Err(TransportFailure::Http {
                status: response.status().as_u16(),
            }
            .into());
        }

        Ok(response
            .json::<MatchSnapshot>()
            .await
            .map_err(|e| self.failure(e))?)
    }

    pub async fn fetch_deltas(&self, since: u64) -> Result<DeltaBatch, SyncFault> {
        let url = format!("{}/api/matches/{}/deltas", self.base_url, self.match_id);
        let response = self
            .client
            .get(&url)
            .query(&[("since", since)])
            .send()
            .await
            .map_err(|e| self.failure(e))?;

        match response.status() {
            StatusCode::OK => Ok(response
                .json::<DeltaBatch>()
                .await
                .map_err(|e| self.failure(e))?),
            StatusCode::GONE => {
                let oldest = response
                    .json::<ErrorResponse>()
                    .await
                    .ok()
                    .and_then(|body| body.oldest_sequence)
                    .unwrap_or(since + 2);
                Err(SyncFault::BackfillUnavailable {
                    requested: since + 1,
                    oldest,
                })
            }
            status => Err(TransportFailure::Http {
                status: status.as_u16(),
            }
            .into()),
        }
    }

    fn failure(&self, err: reqwest::Error) -> TransportFailure {
        match TransportFailure::from(err) {
            TransportFailure::Timeout { .. } => TransportFailure::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            },
            other => other,
        }
    }
}

impl SyncSource for HttpSyncSource {
    async fn load_snapshot(&self) -> Result<MatchSnapshot, SyncFault> {
        self.fetch_snapshot().await
    }

    async fn backfill(&self, since: u64) -> Result<Vec<UpdateDelta>, SyncFault> {
        Ok(self.fetch_deltas(since).await?.deltas)
    }
}

/// Polls the delta endpoint on a fixed interval, backing off after failures
pub struct PollingTransport {
    handle: JoinHandle<()>,
}

impl PollingTransport {
    pub fn spawn(
        source: HttpSyncSource,
        from_sequence: u64,
        interval: Duration,
        retry: RetryPolicy,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let handle = tokio::spawn(async move {
            let match_id = source.match_id();
            let mut cursor = from_sequence;
            let mut failures: u32 = 0;

            info!(match_id = %match_id, from_sequence, "Polling transport started");

            loop {
                let events = match source.fetch_deltas(cursor).await {
                    Ok(batch) => {
                        failures = 0;
                        batch.deltas.into_iter().map(TransportEvent::Delta).collect()
                    }
                    Err(SyncFault::BackfillUnavailable { requested, oldest }) => {
                        // Range evicted server-side; jump the cursor to a snapshot
                        warn!(match_id = %match_id, requested, oldest, "Backfill evicted, fetching snapshot");
                        match source.fetch_snapshot().await {
                            Ok(snapshot) => {
                                failures = 0;
                                vec![TransportEvent::Snapshot(snapshot)]
                            }
                            Err(fault) => {
                                failures += 1;
                                vec![TransportEvent::Failure(fault)]
                            }
                        }
                    }
                    Err(fault) => {
                        failures += 1;
                        warn!(match_id = %match_id, failures, fault = %fault, "Poll failed");
                        vec![TransportEvent::Failure(fault)]
                    }
                };

                let mut finished = false;
                for event in events {
                    match &event {
                        TransportEvent::Delta(delta) => {
                            cursor = cursor.max(delta.sequence);
                            finished |= delta.completes_match();
                        }
                        TransportEvent::Snapshot(snapshot) => {
                            cursor = snapshot.sequence;
                            finished |= snapshot.state.status.is_terminal();
                        }
                        TransportEvent::Failure(_) => {}
                    }
                    if tx.send(event).await.is_err() {
                        debug!(match_id = %match_id, "Polling consumer went away");
                        return;
                    }
                }

                if finished {
                    info!(match_id = %match_id, cursor, "Match completed, polling stopped");
                    return;
                }

                let pause = if failures == 0 {
                    interval
                } else {
                    retry.delay(failures - 1)
                };
                tokio::time::sleep(pause).await;
            }
        });

        (Self { handle }, rx)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
