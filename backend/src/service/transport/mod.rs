//! Delivery mechanisms between a match's [`UpdateChannel`] and its views.
//!
//! Every transport produces the same [`TransportEvent`] values, so views
//! reconcile through one path no matter how deltas reached them.
//!
//! [`UpdateChannel`]: crate::service::update_channel::UpdateChannel

pub mod local;
pub mod polling;
pub mod redis_relay;
pub mod retry;

pub use local::LocalTransport;
pub use polling::{HttpSyncSource, PollingTransport};
pub use redis_relay::RedisRelay;
pub use retry::RetryPolicy;

use crate::models::{MatchSnapshot, UpdateDelta};
use crate::service::sync_fault::SyncFault;

/// One message from a transport to a view
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Snapshot(MatchSnapshot),
    Delta(UpdateDelta),
    Failure(SyncFault),
}

/// Events buffered between a transport task and its consumer
pub const EVENT_QUEUE_CAPACITY: usize = 256;
