//! Conversation aggregation and the conversation-list view.
//!
//! A conversation is derived, never stored: [`aggregate`] folds the
//! messages a user sent or received into one summary per counterpart.
//! [`ConversationListView`] keeps that fold current as inserts and read
//! receipts arrive, and [`ConversationList`] wires the view to the
//! realtime channel and the event bus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use mkt_core::constants::UNREAD_BADGE_CAP;
use mkt_core::error::MktResult;
use mkt_models::{EntityStore, Message, MessageFilter};
use mkt_realtime::{ChannelEvent, RealtimeMessageChannel, Subscription, ViewScope};

use crate::event_bus::{AppEvent, EventBus};
use crate::session::Session;

/// Summary of the thread with one counterpart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub counterpart_id: Uuid,
    pub last_message: Message,
    /// Messages from the counterpart the user has not read.
    pub unread_count: usize,
}

impl Conversation {
    /// Badge text: none when everything is read, capped at "9+".
    pub fn badge_label(&self) -> Option<String> {
        match self.unread_count {
            0 => None,
            n if n > UNREAD_BADGE_CAP => Some(format!("{UNREAD_BADGE_CAP}+")),
            n => Some(n.to_string()),
        }
    }
}

/// Fold `messages` into conversations for `user_id`.
///
/// Messages not involving the user are ignored and duplicate ids count
/// once. Within a group the last message is the first under the order
/// (created_at desc, id desc), so equal timestamps resolve the same way
/// regardless of input order. Conversations are ordered by their last
/// message, newest first, then by counterpart id.
pub fn aggregate(user_id: Uuid, messages: &[Message]) -> Vec<Conversation> {
    let mut seen = HashSet::new();
    let mut sorted: Vec<&Message> = messages
        .iter()
        .filter(|m| m.involves(user_id) && seen.insert(m.id))
        .collect();
    sorted.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    let mut groups: HashMap<Uuid, Conversation> = HashMap::new();
    for message in sorted {
        let Some(counterpart_id) = message.counterpart(user_id) else {
            continue;
        };
        let conversation = groups.entry(counterpart_id).or_insert_with(|| Conversation {
            counterpart_id,
            last_message: message.clone(),
            unread_count: 0,
        });
        if message.is_unread_for(user_id) {
            conversation.unread_count += 1;
        }
    }

    let mut conversations: Vec<Conversation> = groups.into_values().collect();
    conversations.sort_by(|a, b| {
        b.last_message
            .created_at
            .cmp(&a.last_message.created_at)
            .then_with(|| a.counterpart_id.cmp(&b.counterpart_id))
    });
    conversations
}

/// Conversation list state for one user, rebuilt from its message set.
#[derive(Debug, Clone)]
pub struct ConversationListView {
    user_id: Uuid,
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
    /// Ids named by read receipts. An insert delivered after its receipt
    /// still lands as read.
    read_ids: HashSet<Uuid>,
    conversations: Vec<Conversation>,
}

impl ConversationListView {
    pub fn new(user_id: Uuid, messages: Vec<Message>) -> Self {
        let mut view = Self {
            user_id,
            messages: Vec::new(),
            ids: HashSet::new(),
            read_ids: HashSet::new(),
            conversations: Vec::new(),
        };
        view.replace(messages);
        view
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation_with(&self, counterpart_id: Uuid) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.counterpart_id == counterpart_id)
    }

    pub fn unread_total(&self) -> usize {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    /// Replace the message set with a fresh read.
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.ids.clear();
        for message in messages {
            if message.involves(self.user_id) && self.ids.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.recompute();
    }

    /// Apply a delivered insert. Returns false for duplicates and for
    /// messages that do not involve the user.
    pub fn apply_insert(&mut self, mut message: Message) -> bool {
        if !message.involves(self.user_id) || !self.ids.insert(message.id) {
            return false;
        }
        if self.read_ids.contains(&message.id) {
            message.is_read = true;
        }
        self.messages.push(message);
        self.recompute();
        true
    }

    /// Mark the listed messages read. Messages not named stay as they
    /// are, so anything that arrived after the receipt keeps its badge.
    pub fn apply_read(&mut self, message_ids: &[Uuid]) -> bool {
        self.read_ids.extend(message_ids.iter().copied());
        let mut changed = false;
        for message in &mut self.messages {
            if self.read_ids.contains(&message.id) && message.is_unread_for(self.user_id) {
                message.is_read = true;
                changed = true;
            }
        }
        if changed {
            self.recompute();
        }
        changed
    }

    fn recompute(&mut self) {
        self.conversations = aggregate(self.user_id, &self.messages);
    }
}

enum Wake {
    Channel(Option<MktResult<ChannelEvent>>),
    Bus(Result<AppEvent, RecvError>),
}

/// Live conversation list: the view plus its realtime and bus inputs.
pub struct ConversationList {
    session: Session,
    store: Arc<dyn EntityStore>,
    channel: RealtimeMessageChannel,
    subscription: Subscription,
    bus_rx: broadcast::Receiver<AppEvent>,
    view: ConversationListView,
}

impl ConversationList {
    /// Attach the conversation-list scope, then load.
    ///
    /// Subscribing before the read means an insert racing the load is
    /// either in the read or delivered afterwards; dedupe covers both.
    pub async fn open(
        session: &Session,
        store: Arc<dyn EntityStore>,
        channel: &RealtimeMessageChannel,
        event_bus: &EventBus,
    ) -> MktResult<Self> {
        session.ensure_active()?;
        let user_id = session.user_id();

        let bus_rx = event_bus.subscribe();
        let subscription = channel
            .attach(ViewScope::ConversationList, MessageFilter::Involving(user_id))
            .await?;
        let messages = store.list_messages_involving(user_id).await?;
        let view = ConversationListView::new(user_id, messages);
        debug!(
            "conversation list for {user_id} opened with {} conversations",
            view.conversations().len()
        );

        Ok(Self {
            session: session.clone(),
            store,
            channel: channel.clone(),
            subscription,
            bus_rx,
            view,
        })
    }

    pub fn view(&self) -> &ConversationListView {
        &self.view
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.view.conversations()
    }

    /// Re-read the full message set.
    pub async fn refresh(&mut self) -> MktResult<()> {
        self.session.ensure_active()?;
        let messages = self
            .store
            .list_messages_involving(self.session.user_id())
            .await?;
        self.view.replace(messages);
        Ok(())
    }

    /// Wait for one input and apply it. Returns false once the
    /// subscription has ended.
    pub async fn pump_once(&mut self) -> MktResult<bool> {
        let wake = tokio::select! {
            event = self.subscription.next() => Wake::Channel(event),
            event = self.bus_rx.recv() => Wake::Bus(event),
        };

        match wake {
            Wake::Channel(None) => return Ok(false),
            Wake::Channel(Some(Err(e))) => return Err(e),
            Wake::Channel(Some(Ok(ChannelEvent::Inserted(message)))) => {
                self.view.apply_insert(message);
            }
            Wake::Channel(Some(Ok(ChannelEvent::Resync))) => {
                debug!("conversation list resync");
                self.refresh().await?;
            }
            Wake::Bus(Ok(AppEvent::MessagesRead {
                reader_id,
                message_ids,
                ..
            })) if reader_id == self.session.user_id() => {
                self.view.apply_read(&message_ids);
            }
            Wake::Bus(Ok(_)) => {}
            Wake::Bus(Err(RecvError::Lagged(skipped))) => {
                warn!("conversation list missed {skipped} bus events, reloading");
                self.refresh().await?;
            }
            Wake::Bus(Err(RecvError::Closed)) => return Ok(false),
        }
        Ok(true)
    }

    /// Drop this list's subscription, clearing the scope unless a newer
    /// list holds it.
    pub async fn close(self) {
        self.channel
            .release(ViewScope::ConversationList, &self.subscription.handle())
            .await;
    }
}
