//! Store-side change feed.
//!
//! Committed message inserts are published on a `tokio::sync::broadcast`
//! channel. Each subscriber holds a [`FeedSubscription`] that filters the
//! shared stream by table and predicate, and that ends in one of three
//! ways: closed by `unsubscribe`, lagged past the buffer, or disconnected
//! when the feed drops its live subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::message::Message;
use crate::store::Table;

/// Predicate over message inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFilter {
    /// Messages exchanged between two users, either direction.
    Between(Uuid, Uuid),
    /// Messages the user sent or received.
    Involving(Uuid),
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        match *self {
            Self::Between(a, b) => {
                (message.sender_id == a && message.receiver_id == b)
                    || (message.sender_id == b && message.receiver_id == a)
            }
            Self::Involving(u) => message.involves(u),
        }
    }
}

/// One committed insert.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Position in commit order across the whole feed.
    pub seq: u64,
    pub table: Table,
    pub message: Message,
}

/// Identifies a live feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedHandle(u64);

impl std::fmt::Display for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "feed#{}", self.0)
    }
}

/// Why a subscription stopped yielding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("subscription closed")]
    Closed,
    #[error("subscription lagged, {0} events skipped")]
    Lagged(u64),
    #[error("change feed disconnected")]
    Disconnected,
}

type LiveMap = Arc<Mutex<HashMap<u64, watch::Sender<bool>>>>;

/// Broadcast fan-out of committed inserts.
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
    seq: AtomicU64,
    next_handle: AtomicU64,
    live: LiveMap,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: AtomicU64::new(0),
            next_handle: AtomicU64::new(1),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish a committed insert. Callers serialize publishes in commit order.
    pub fn publish(&self, table: Table, message: Message) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let receivers = self
            .tx
            .send(ChangeEvent { seq, table, message })
            .unwrap_or(0);
        debug!("published {table} insert seq={seq} to {receivers} receivers");
        seq
    }

    /// Open a subscription. Events published after this returns are delivered.
    pub fn open(&self, table: Table, filter: MessageFilter) -> FeedSubscription {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let (closed_tx, closed_rx) = watch::channel(false);
        lock(&self.live).insert(id, closed_tx);
        debug!("opened feed#{id} on {table} for {filter:?}");

        FeedSubscription {
            handle: FeedHandle(id),
            table,
            filter,
            rx: self.tx.subscribe(),
            closed: closed_rx,
            live: Arc::clone(&self.live),
        }
    }

    /// Close a subscription. Closing an unknown or already closed handle is a no-op.
    pub fn close(&self, handle: FeedHandle) -> bool {
        let sender = lock(&self.live).remove(&handle.0);
        match sender {
            Some(tx) => {
                let _ = tx.send(true);
                debug!("closed {handle}");
                true
            }
            None => false,
        }
    }

    /// Drop every live subscription as a transport failure would.
    /// Subscribers observe [`FeedError::Disconnected`].
    pub fn interrupt(&self) -> usize {
        let dropped: Vec<_> = lock(&self.live).drain().collect();
        warn!("change feed interrupted, {} subscriptions dropped", dropped.len());
        dropped.len()
    }

    /// Number of subscriptions currently open.
    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }
}

fn lock(live: &LiveMap) -> std::sync::MutexGuard<'_, HashMap<u64, watch::Sender<bool>>> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Filtered receiving end of the change feed.
#[derive(Debug)]
pub struct FeedSubscription {
    handle: FeedHandle,
    table: Table,
    filter: MessageFilter,
    rx: broadcast::Receiver<ChangeEvent>,
    closed: watch::Receiver<bool>,
    live: LiveMap,
}

impl FeedSubscription {
    pub fn handle(&self) -> FeedHandle {
        self.handle
    }

    pub fn filter(&self) -> MessageFilter {
        self.filter
    }

    /// Wait for the next matching insert.
    ///
    /// A close wins over any event still buffered.
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        loop {
            if *self.closed.borrow() {
                return Err(FeedError::Closed);
            }

            tokio::select! {
                biased;

                changed = self.closed.changed() => {
                    let closed = *self.closed.borrow();
                    match changed {
                        Ok(()) if closed => return Err(FeedError::Closed),
                        Ok(()) => continue,
                        Err(_) if closed => return Err(FeedError::Closed),
                        Err(_) => return Err(FeedError::Disconnected),
                    }
                }

                event = self.rx.recv() => match event {
                    Ok(event) => {
                        if event.table == self.table && self.filter.matches(&event.message) {
                            return Ok(event);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => return Err(FeedError::Lagged(skipped)),
                    Err(RecvError::Closed) => return Err(FeedError::Disconnected),
                },
            }
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        lock(&self.live).remove(&self.handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_ts;
    use std::time::Duration;

    fn message(from: Uuid, to: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            booking_id: None,
            content: "hello".into(),
            is_read: false,
            created_at: now_ts(),
        }
    }

    #[test]
    fn test_filter_matches() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(MessageFilter::Between(a, b).matches(&message(b, a)));
        assert!(!MessageFilter::Between(a, b).matches(&message(a, c)));
        assert!(MessageFilter::Involving(c).matches(&message(a, c)));
        assert!(!MessageFilter::Involving(c).matches(&message(a, b)));
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_in_order() {
        let feed = ChangeFeed::new(16);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut sub = feed.open(Table::Messages, MessageFilter::Between(a, b));

        let m1 = message(a, b);
        let m2 = message(a, c);
        let m3 = message(b, a);
        feed.publish(Table::Messages, m1.clone());
        feed.publish(Table::Messages, m2);
        feed.publish(Table::Messages, m3.clone());

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.message.id, m1.id);
        assert_eq!(second.message.id, m3.id);
        assert!(first.seq < second.seq);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_beats_buffered_events() {
        let feed = ChangeFeed::new(16);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub = feed.open(Table::Messages, MessageFilter::Involving(a));
        feed.publish(Table::Messages, message(a, b));

        assert!(feed.close(sub.handle()));
        assert!(!feed.close(sub.handle()));
        assert_eq!(sub.recv().await.unwrap_err(), FeedError::Closed);
        assert_eq!(feed.live_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_disconnects() {
        let feed = ChangeFeed::new(16);
        let mut sub = feed.open(Table::Messages, MessageFilter::Involving(Uuid::new_v4()));
        assert_eq!(feed.interrupt(), 1);

        let result = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap();
        assert_eq!(result.unwrap_err(), FeedError::Disconnected);
    }

    #[tokio::test]
    async fn test_lag_is_reported() {
        let feed = ChangeFeed::new(2);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub = feed.open(Table::Messages, MessageFilter::Involving(a));
        for _ in 0..5 {
            feed.publish(Table::Messages, message(a, b));
        }
        assert!(matches!(sub.recv().await, Err(FeedError::Lagged(_))));
    }

    #[test]
    fn test_drop_releases_slot() {
        let feed = ChangeFeed::new(4);
        let sub = feed.open(Table::Messages, MessageFilter::Involving(Uuid::new_v4()));
        assert_eq!(feed.live_count(), 1);
        drop(sub);
        assert_eq!(feed.live_count(), 0);
    }
}
