//! Marketplace Realtime - message insert delivery for the chat and conversation views.
//!
//! This crate wraps the store's change feed in cancellable subscriptions:
//! - One subscription per active view scope, torn down before a replacement
//! - Automatic resubscription with exponential backoff and jitter
//! - `Resync` events whenever delivery may have had a gap
//! - Connection state observable through a watch channel

pub mod channel;
pub mod events;

// Re-export key types
pub use channel::{RealtimeMessageChannel, ReconnectConfig, Subscription, SubscriptionHandle};
pub use events::{ChannelEvent, ConnectionState, ViewScope};
