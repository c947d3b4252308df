//! Typed event bus for intra-service communication.
//!
//! Uses tokio broadcast channels to decouple services from one another.
//! The booking and messaging services emit; the views listen.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use mkt_models::BookingStatus;

/// All application-level event types that flow through the event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// A session was created for a signed-in user.
    SessionStarted { user_id: Uuid },
    /// A session was invalidated (sign-out or replaced by another sign-in).
    SessionEnded { user_id: Uuid },
    /// A customer created a booking.
    BookingCreated {
        booking_id: Uuid,
        customer_id: Uuid,
        provider_id: Uuid,
    },
    /// A transition was applied.
    BookingStatusChanged {
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    },
    /// A transition lost to a concurrent change.
    BookingConflict {
        booking_id: Uuid,
        attempted: BookingStatus,
        current: Option<BookingStatus>,
    },
    /// A review was stored.
    ReviewSubmitted {
        booking_id: Uuid,
        review_id: Uuid,
        rating: i64,
    },
    /// A message was stored.
    MessageSent {
        message_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
    },
    /// `reader_id` read the listed messages from `counterpart_id`.
    MessagesRead {
        reader_id: Uuid,
        counterpart_id: Uuid,
        message_ids: Vec<Uuid>,
    },
}

/// Application-wide event bus backed by a tokio broadcast channel.
///
/// Every subscriber gets every event. Slow subscribers that fall behind
/// receive a `Lagged` error and must re-read whatever state they track.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AppEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to receive application events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: AppEvent) {
        let label = event_label(&event);
        match self.sender.send(event) {
            Ok(count) => {
                debug!("event_bus: emitted {label} to {count} subscriber(s)");
            }
            Err(_) => {
                debug!("event_bus: no subscribers for {label}");
            }
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Human-readable label for an event (for logging).
fn event_label(event: &AppEvent) -> &'static str {
    match event {
        AppEvent::SessionStarted { .. } => "SessionStarted",
        AppEvent::SessionEnded { .. } => "SessionEnded",
        AppEvent::BookingCreated { .. } => "BookingCreated",
        AppEvent::BookingStatusChanged { .. } => "BookingStatusChanged",
        AppEvent::BookingConflict { .. } => "BookingConflict",
        AppEvent::ReviewSubmitted { .. } => "ReviewSubmitted",
        AppEvent::MessageSent { .. } => "MessageSent",
        AppEvent::MessagesRead { .. } => "MessagesRead",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let user_id = Uuid::new_v4();

        bus.emit(AppEvent::SessionStarted { user_id });

        assert_eq!(rx.recv().await.unwrap(), AppEvent::SessionStarted { user_id });
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = AppEvent::MessagesRead {
            reader_id: Uuid::new_v4(),
            counterpart_id: Uuid::new_v4(),
            message_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        bus.emit(event.clone());

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(16);
        bus.emit(AppEvent::SessionEnded { user_id: Uuid::new_v4() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_labels() {
        assert_eq!(
            event_label(&AppEvent::BookingConflict {
                booking_id: Uuid::nil(),
                attempted: BookingStatus::Accepted,
                current: None,
            }),
            "BookingConflict"
        );
    }
}
