//! Event and state types for realtime delivery.

use mkt_models::Message;

/// Realtime delivery state of one subscription, or of the channel as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing is live: never subscribed, or unsubscribed.
    Disconnected,
    /// Opening the feed subscription.
    Connecting,
    /// Subscriptions are live.
    Connected,
    /// The feed dropped; resubscribing with backoff.
    Reconnecting,
    /// Resubscription gave up after the configured number of attempts.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Item delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A committed message insert matching the subscription's predicate.
    Inserted(Message),
    /// Events may have been missed. Re-fetch the affected list.
    Resync,
}

/// View a subscription belongs to. At most one subscription per scope is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewScope {
    Chat,
    ConversationList,
}

impl std::fmt::Display for ViewScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::ConversationList => write!(f, "conversation-list"),
        }
    }
}
