//! Live chat thread with one counterpart.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use mkt_core::error::{MktError, MktResult};
use mkt_models::{Message, MessageFilter};
use mkt_realtime::{ChannelEvent, RealtimeMessageChannel, Subscription, ViewScope};

use crate::message::MessageService;
use crate::session::Session;

/// An open chat. Opening it marks the counterpart's messages read, and
/// so does every counterpart message delivered while it stays open.
pub struct ChatView {
    session: Session,
    counterpart_id: Uuid,
    messages: MessageService,
    channel: RealtimeMessageChannel,
    subscription: Subscription,
    thread: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl ChatView {
    /// Attach the chat scope to this counterpart (replacing any other
    /// open chat), load the thread, and mark it read.
    pub async fn open(
        session: &Session,
        counterpart_id: Uuid,
        messages: MessageService,
        channel: &RealtimeMessageChannel,
    ) -> MktResult<Self> {
        session.ensure_active()?;
        if counterpart_id == session.user_id() {
            return Err(MktError::InvalidInput("you cannot chat with yourself".into()));
        }

        let subscription = channel
            .attach(
                ViewScope::Chat,
                MessageFilter::Between(session.user_id(), counterpart_id),
            )
            .await?;

        let mut view = Self {
            session: session.clone(),
            counterpart_id,
            messages,
            channel: channel.clone(),
            subscription,
            thread: Vec::new(),
            ids: HashSet::new(),
        };
        view.reload().await?;
        Ok(view)
    }

    pub fn counterpart_id(&self) -> Uuid {
        self.counterpart_id
    }

    /// The thread, oldest first.
    pub fn thread(&self) -> &[Message] {
        &self.thread
    }

    /// Send a message to the counterpart and append it.
    pub async fn send(&mut self, content: &str, booking_id: Option<Uuid>) -> MktResult<Message> {
        let message = self
            .messages
            .send(&self.session, self.counterpart_id, content, booking_id)
            .await?;
        self.append(message.clone());
        Ok(message)
    }

    /// Wait for one realtime event and apply it. Returns false once the
    /// subscription has ended.
    pub async fn pump_once(&mut self) -> MktResult<bool> {
        match self.subscription.next().await {
            None => Ok(false),
            Some(Err(e)) => Err(e),
            Some(Ok(ChannelEvent::Resync)) => {
                debug!("chat with {} resync", self.counterpart_id);
                self.reload().await?;
                Ok(true)
            }
            Some(Ok(ChannelEvent::Inserted(message))) => {
                let incoming = message.sender_id == self.counterpart_id;
                if self.append(message) && incoming {
                    self.mark_read().await?;
                }
                Ok(true)
            }
        }
    }

    /// Drop this view's subscription. The chat scope is only cleared if
    /// no newer chat has taken it over.
    pub async fn close(self) {
        self.channel
            .release(ViewScope::Chat, &self.subscription.handle())
            .await;
    }

    async fn reload(&mut self) -> MktResult<()> {
        let thread = self.messages.thread(&self.session, self.counterpart_id).await?;
        self.ids = thread.iter().map(|m| m.id).collect();
        self.thread = thread;
        self.mark_read().await
    }

    async fn mark_read(&mut self) -> MktResult<()> {
        self.messages.mark_read(&self.session, self.counterpart_id).await?;
        let me = self.session.user_id();
        for message in &mut self.thread {
            if message.is_unread_for(me) {
                message.is_read = true;
            }
        }
        Ok(())
    }

    fn append(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.thread.push(message);
        true
    }
}
