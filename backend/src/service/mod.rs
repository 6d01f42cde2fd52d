// Service layer for live match state sync
pub mod follower;
pub mod journal;
pub mod match_registry;
pub mod match_state_store;
pub mod reconciliation;
pub mod subscriber_view;
pub mod sync_fault;
pub mod transport;
pub mod update_channel;
pub mod view_sync;

#[cfg(test)]
mod match_state_store_test;

pub use journal::{Journal, JournalError};
pub use match_registry::MatchRegistry;
pub use match_state_store::{MatchStateError, MatchStateStore};
pub use reconciliation::{Reconciled, ReconciliationPolicy};
pub use subscriber_view::{
    AdminPanelView, BroadcastOverlayView, Freshness, MatchPageView, Projection, SubscriberView,
    ViewKind,
};
pub use sync_fault::{SyncFault, TransportFailure};
pub use transport::{RetryPolicy, TransportEvent};
pub use update_channel::{ChannelConfig, DeltaSubscription, UpdateChannel};
pub use view_sync::{SyncSource, ViewSync};
