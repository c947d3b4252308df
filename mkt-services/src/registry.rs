//! Service registry.
//!
//! Builds every service over one store, one event bus, and one realtime
//! channel, and hands out the live views.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use mkt_core::config::ConfigHandle;
use mkt_core::error::MktResult;
use mkt_models::{EntityStore, IdentityDirectory};
use mkt_realtime::RealtimeMessageChannel;

use crate::booking::BookingLifecycle;
use crate::chat::ChatView;
use crate::conversation::ConversationList;
use crate::event_bus::EventBus;
use crate::message::MessageService;
use crate::review::ReviewGate;
use crate::session::{AuthChange, Session, SessionManager};

/// Central registry holding shared infrastructure and all services.
pub struct ServiceRegistry {
    /// Application configuration.
    pub config: ConfigHandle,
    /// Application-level event bus.
    pub event_bus: EventBus,
    /// Entity store gateway.
    pub store: Arc<dyn EntityStore>,
    pub sessions: SessionManager,
    pub bookings: BookingLifecycle,
    pub reviews: ReviewGate,
    pub messages: MessageService,
    pub channel: RealtimeMessageChannel,
}

impl ServiceRegistry {
    /// Wire the services over `backend`, which serves both the entity
    /// store and the identity directory.
    pub async fn new<S>(config: ConfigHandle, backend: Arc<S>) -> Self
    where
        S: EntityStore + IdentityDirectory + 'static,
    {
        let snapshot = config.read().await.clone();
        let store: Arc<dyn EntityStore> = backend.clone();
        let directory: Arc<dyn IdentityDirectory> = backend;
        let event_bus = EventBus::new(snapshot.messaging.event_bus_capacity);

        let registry = Self {
            sessions: SessionManager::new(directory, event_bus.clone()),
            bookings: BookingLifecycle::new(store.clone(), event_bus.clone()),
            reviews: ReviewGate::new(
                store.clone(),
                event_bus.clone(),
                snapshot.messaging.max_review_comment_length,
            ),
            messages: MessageService::new(
                store.clone(),
                event_bus.clone(),
                snapshot.messaging.max_message_length,
            ),
            channel: RealtimeMessageChannel::new(store.clone(), &snapshot.realtime),
            config,
            event_bus,
            store,
        };
        info!("service registry ready");
        registry
    }

    /// Sign in `user_id` and return the new session.
    pub async fn sign_in(&self, user_id: Uuid) -> MktResult<Session> {
        self.sessions
            .handle_auth_change(AuthChange::SignedIn { user_id })
            .await?;
        self.sessions.require().await
    }

    pub async fn open_conversation_list(&self, session: &Session) -> MktResult<ConversationList> {
        ConversationList::open(session, self.store.clone(), &self.channel, &self.event_bus).await
    }

    pub async fn open_chat(&self, session: &Session, counterpart_id: Uuid) -> MktResult<ChatView> {
        ChatView::open(session, counterpart_id, self.messages.clone(), &self.channel).await
    }

    /// Detach every view and end the session.
    pub async fn shutdown(&self) -> MktResult<()> {
        info!("shutting down services");
        self.channel.shutdown().await;
        self.sessions.handle_auth_change(AuthChange::SignedOut).await?;
        Ok(())
    }
}
