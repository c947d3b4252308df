//! Message service: send, read threads, mark read.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use mkt_core::error::{MktError, MktResult};
use mkt_models::{EntityStore, Message, NewMessage};

use crate::event_bus::{AppEvent, EventBus};
use crate::session::Session;

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn EntityStore>,
    event_bus: EventBus,
    max_message_length: usize,
}

impl MessageService {
    pub fn new(store: Arc<dyn EntityStore>, event_bus: EventBus, max_message_length: usize) -> Self {
        Self {
            store,
            event_bus,
            max_message_length,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Send `content` from the session user to `receiver_id`.
    ///
    /// Content is trimmed and must be non-empty and within the configured
    /// length. A linked booking must be shared by both participants.
    pub async fn send(
        &self,
        session: &Session,
        receiver_id: Uuid,
        content: &str,
        booking_id: Option<Uuid>,
    ) -> MktResult<Message> {
        session.ensure_active()?;
        let sender_id = session.user_id();
        if receiver_id == sender_id {
            return Err(MktError::InvalidInput("you cannot message yourself".into()));
        }

        let content = content.trim();
        if content.is_empty() {
            return Err(MktError::InvalidInput("message is empty".into()));
        }
        if content.chars().count() > self.max_message_length {
            return Err(MktError::InvalidInput(format!(
                "message is longer than {} characters",
                self.max_message_length
            )));
        }

        if let Some(booking_id) = booking_id {
            let booking = self.store.get_booking(booking_id).await?;
            if !booking.involves(sender_id) {
                return Err(MktError::NotFound(format!("booking {booking_id}")));
            }
            if !booking.involves(receiver_id) {
                return Err(MktError::InvalidInput(
                    "the linked booking does not involve the receiver".into(),
                ));
            }
        }

        let message = self
            .store
            .insert_message(NewMessage {
                sender_id,
                receiver_id,
                booking_id,
                content: content.to_string(),
            })
            .await?;

        debug!("message {} sent {} -> {}", message.id, sender_id, receiver_id);
        self.event_bus.emit(AppEvent::MessageSent {
            message_id: message.id,
            sender_id,
            receiver_id,
        });
        Ok(message)
    }

    /// Thread with `counterpart_id`, oldest first.
    pub async fn thread(&self, session: &Session, counterpart_id: Uuid) -> MktResult<Vec<Message>> {
        session.ensure_active()?;
        self.store.list_messages(session.user_id(), counterpart_id).await
    }

    /// Every message the session user sent or received, newest first.
    pub async fn inbox(&self, session: &Session) -> MktResult<Vec<Message>> {
        session.ensure_active()?;
        self.store.list_messages_involving(session.user_id()).await
    }

    /// Mark everything `counterpart_id` sent the session user as read.
    ///
    /// Emits `MessagesRead` with the ids that flipped, so open conversation
    /// lists clear exactly those and nothing that arrived afterwards.
    pub async fn mark_read(&self, session: &Session, counterpart_id: Uuid) -> MktResult<usize> {
        session.ensure_active()?;
        let reader_id = session.user_id();
        let message_ids = self.store.mark_messages_read(reader_id, counterpart_id).await?;
        let count = message_ids.len();

        if count > 0 {
            info!("{reader_id} read {count} message(s) from {counterpart_id}");
            self.event_bus.emit(AppEvent::MessagesRead {
                reader_id,
                counterpart_id,
                message_ids,
            });
        }
        Ok(count)
    }
}
