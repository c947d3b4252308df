//! Realtime message channel.
//!
//! Each subscription owns a pump task that pulls from a store feed
//! subscription and forwards matching inserts over an mpsc queue. When the
//! feed disconnects the pump resubscribes with the same predicate using
//! exponential backoff with jitter, then emits [`ChannelEvent::Resync`]
//! so the consumer re-fetches whatever it may have missed.
//!
//! Connection state is tracked per subscription. The channel-level state
//! is derived from the live ones: a failed or reconnecting subscription
//! shows through, otherwise any connected one makes the channel connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use mkt_core::config::RealtimeConfig;
use mkt_core::error::{MktError, MktResult};
use mkt_models::{EntityStore, FeedError, FeedHandle, FeedSubscription, MessageFilter, Table};

use crate::events::{ChannelEvent, ConnectionState, ViewScope};

/// Configuration for resubscription behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay between resubscribe attempts.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Maximum number of attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0) added to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for ReconnectConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay(),
            max_delay: config.reconnect_max_delay(),
            max_attempts: config.reconnect_max_attempts,
            jitter_factor: config.jitter_factor,
        }
    }
}

struct ChannelInner {
    store: Arc<dyn EntityStore>,
    reconnect: ReconnectConfig,
    buffer: usize,
    state_tx: watch::Sender<ConnectionState>,
    live: std::sync::Mutex<HashMap<u64, ConnectionState>>,
    next_id: AtomicU64,
}

/// Delivers message inserts to subscribers scoped by predicate.
#[derive(Clone)]
pub struct RealtimeMessageChannel {
    inner: Arc<ChannelInner>,
    scopes: Arc<Mutex<HashMap<ViewScope, SubscriptionHandle>>>,
}

impl RealtimeMessageChannel {
    pub fn new(store: Arc<dyn EntityStore>, config: &RealtimeConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                store,
                reconnect: ReconnectConfig::from(config),
                buffer: config.subscription_buffer.max(1),
                state_tx,
                live: std::sync::Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
            scopes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to channel-level state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Open a subscription for `filter`.
    ///
    /// The store-side feed is live when this returns, so any insert
    /// committed afterwards is delivered.
    pub async fn subscribe(&self, filter: MessageFilter) -> MktResult<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.track(id, ConnectionState::Connecting);

        let feed = match self
            .inner
            .store
            .subscribe_changes(Table::Messages, filter)
            .await
        {
            Ok(feed) => feed,
            Err(e) => {
                warn!("subscribe for {filter:?} failed: {e}");
                self.inner.forget(id);
                return Err(e);
            }
        };

        let (state, _) = watch::channel(ConnectionState::Connected);
        let handle = SubscriptionHandle {
            inner: Arc::new(HandleInner {
                id,
                filter,
                detached: AtomicBool::new(false),
                feed_handle: std::sync::Mutex::new(feed.handle()),
                task: std::sync::Mutex::new(None),
                state,
                channel: Arc::clone(&self.inner),
            }),
        };
        self.inner.track(id, ConnectionState::Connected);

        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let task = tokio::spawn(pump(Arc::clone(&self.inner), handle.clone(), feed, tx));
        handle.install_task(task);

        debug!("subscription #{id} open for {filter:?}");
        Ok(Subscription { handle, rx })
    }

    /// Replace the subscription for `scope`. The previous one is torn down
    /// before the new one is opened.
    pub async fn attach(&self, scope: ViewScope, filter: MessageFilter) -> MktResult<Subscription> {
        let mut scopes = self.scopes.lock().await;
        if let Some(previous) = scopes.remove(&scope) {
            debug!("detaching previous {scope} subscription #{}", previous.id());
            previous.unsubscribe().await;
        }

        let subscription = self.subscribe(filter).await?;
        scopes.insert(scope, subscription.handle());
        info!("{scope} attached to {filter:?}");
        Ok(subscription)
    }

    /// Tear down `handle` and clear `scope` if `handle` still holds it.
    ///
    /// Returns whether the scope entry was cleared. A view closing after a
    /// newer view replaced it leaves the newer subscription attached.
    pub async fn release(&self, scope: ViewScope, handle: &SubscriptionHandle) -> bool {
        let cleared = {
            let mut scopes = self.scopes.lock().await;
            let owned = scopes.get(&scope).is_some_and(|h| h.id() == handle.id());
            if owned {
                scopes.remove(&scope);
            }
            owned
        };
        handle.unsubscribe().await;
        if cleared {
            info!("{scope} detached");
        } else {
            debug!("#{} released, {scope} held by a newer subscription", handle.id());
        }
        cleared
    }

    /// Tear down whatever subscription holds `scope`. Returns whether one
    /// existed.
    pub async fn detach(&self, scope: ViewScope) -> bool {
        let previous = self.scopes.lock().await.remove(&scope);
        match previous {
            Some(handle) => {
                handle.unsubscribe().await;
                info!("{scope} detached");
                true
            }
            None => false,
        }
    }

    /// Predicate currently attached to `scope`.
    pub async fn scope_filter(&self, scope: ViewScope) -> Option<MessageFilter> {
        self.scopes.lock().await.get(&scope).map(|h| h.filter())
    }

    /// Detach every scope. The channel reads disconnected once no other
    /// subscription is live.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.scopes.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.unsubscribe().await;
        }
    }

    /// Calculate the resubscribe delay using exponential backoff with jitter.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.inner.reconnect_delay(attempt)
    }
}

impl ChannelInner {
    fn track(&self, id: u64, state: ConnectionState) {
        let mut live = lock(&self.live);
        live.insert(id, state);
        self.set_state(aggregate_state(live.values().copied()));
    }

    fn forget(&self, id: u64) {
        let mut live = lock(&self.live);
        live.remove(&id);
        self.set_state(aggregate_state(live.values().copied()));
    }

    fn set_state(&self, new_state: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            info!("realtime state: {} -> {}", *state, new_state);
            *state = new_state;
            true
        });
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.reconnect.base_delay.as_secs_f64();
        let max = self.reconnect.max_delay.as_secs_f64();

        let exponential = (base * 2.0_f64.powi(attempt.min(31) as i32)).min(max);

        let jitter_range = exponential * self.reconnect.jitter_factor;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let floor = base.min(0.5);
        let delay = (exponential + jitter).max(floor);

        Duration::from_secs_f64(delay)
    }

    /// Resubscribe `handle`'s predicate after a disconnect.
    ///
    /// Returns `None` once the handle is detached or attempts run out.
    async fn resubscribe(&self, handle: &SubscriptionHandle) -> Option<FeedSubscription> {
        handle.set_state(ConnectionState::Reconnecting);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.reconnect.max_attempts > 0 && attempt > self.reconnect.max_attempts {
                error!(
                    "max resubscribe attempts ({}) reached for #{}",
                    self.reconnect.max_attempts,
                    handle.id()
                );
                handle.set_state(ConnectionState::Failed);
                return None;
            }

            let delay = self.reconnect_delay(attempt - 1);
            warn!(
                "resubscribe attempt {attempt} for #{} in {:.2}s",
                handle.id(),
                delay.as_secs_f64()
            );
            sleep(delay).await;

            if handle.is_detached() {
                return None;
            }

            match self
                .store
                .subscribe_changes(Table::Messages, handle.filter())
                .await
            {
                Ok(feed) => {
                    if handle.is_detached() {
                        self.store.unsubscribe(feed.handle()).await;
                        return None;
                    }
                    handle.replace_feed_handle(feed.handle());
                    info!("subscription #{} restored after {attempt} attempt(s)", handle.id());
                    handle.set_state(ConnectionState::Connected);
                    return Some(feed);
                }
                Err(e) => error!("resubscribe attempt {attempt} failed: {e}"),
            }
        }
    }
}

/// Failed and reconnecting subscriptions dominate; otherwise one connected
/// subscription is enough.
fn aggregate_state(states: impl Iterator<Item = ConnectionState>) -> ConnectionState {
    let rank = |s: ConnectionState| match s {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Reconnecting => 3,
        ConnectionState::Failed => 4,
    };
    states
        .max_by_key(|s| rank(*s))
        .unwrap_or(ConnectionState::Disconnected)
}

async fn pump(
    channel: Arc<ChannelInner>,
    handle: SubscriptionHandle,
    mut feed: FeedSubscription,
    tx: mpsc::Sender<MktResult<ChannelEvent>>,
) {
    loop {
        let outgoing = match feed.recv().await {
            Ok(event) => {
                debug!(
                    "#{} delivering message {} (seq {})",
                    handle.id(),
                    event.message.id,
                    event.seq
                );
                ChannelEvent::Inserted(event.message)
            }
            Err(FeedError::Closed) => break,
            Err(FeedError::Lagged(skipped)) => {
                warn!("#{} lagged, {skipped} events skipped", handle.id());
                ChannelEvent::Resync
            }
            Err(FeedError::Disconnected) => {
                warn!("#{} lost its feed", handle.id());
                match channel.resubscribe(&handle).await {
                    Some(restored) => {
                        feed = restored;
                        ChannelEvent::Resync
                    }
                    None => {
                        if !handle.is_detached() {
                            let _ = tx.send(Err(MktError::TransportDisconnected)).await;
                        }
                        break;
                    }
                }
            }
        };

        if handle.is_detached() || tx.send(Ok(outgoing)).await.is_err() {
            break;
        }
    }
    debug!("#{} pump finished", handle.id());
}

struct HandleInner {
    id: u64,
    filter: MessageFilter,
    detached: AtomicBool,
    feed_handle: std::sync::Mutex<FeedHandle>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    state: watch::Sender<ConnectionState>,
    channel: Arc<ChannelInner>,
}

/// Cancellation handle for a subscription. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn filter(&self) -> MessageFilter {
        self.inner.filter
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// State of this subscription alone.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    fn set_state(&self, new_state: ConnectionState) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            debug!("#{} state: {} -> {}", self.inner.id, *state, new_state);
            *state = new_state;
            true
        });
        if !changed {
            return;
        }
        let channel = &self.inner.channel;
        let mut live = lock(&channel.live);
        if self.is_detached() {
            return;
        }
        live.insert(self.inner.id, new_state);
        channel.set_state(aggregate_state(live.values().copied()));
    }

    /// Detach the subscription. Safe to call at any time, including while
    /// an event is in flight, and calling it again is a no-op.
    pub async fn unsubscribe(&self) {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return;
        }

        let task = lock(&self.inner.task).take();
        if let Some(task) = task {
            task.abort();
        }

        let feed_handle = *lock(&self.inner.feed_handle);
        self.inner.channel.store.unsubscribe(feed_handle).await;
        self.inner.channel.forget(self.inner.id);
        self.inner.state.send_replace(ConnectionState::Disconnected);
        debug!("subscription #{} detached", self.inner.id);
    }

    fn install_task(&self, task: JoinHandle<()>) {
        let mut slot = lock(&self.inner.task);
        if self.is_detached() {
            task.abort();
        } else {
            *slot = Some(task);
        }
    }

    fn replace_feed_handle(&self, handle: FeedHandle) {
        *lock(&self.inner.feed_handle) = handle;
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receiving end of a subscription.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<MktResult<ChannelEvent>>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is detached; an event that was
    /// already queued when the detach happened is dropped. A
    /// `TransportDisconnected` error means resubscription gave up.
    pub async fn next(&mut self) -> Option<MktResult<ChannelEvent>> {
        if self.handle.is_detached() {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.handle.is_detached() {
            return None;
        }
        Some(event)
    }

    /// Take an already queued event without waiting.
    pub fn try_next(&mut self) -> Option<MktResult<ChannelEvent>> {
        if self.handle.is_detached() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub async fn unsubscribe(&self) {
        self.handle.unsubscribe().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkt_core::config::DatabaseConfig;
    use mkt_models::{AppRole, Database, NewMessage, SqliteStore};
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<SqliteStore>,
        channel: RealtimeMessageChannel,
        a: Uuid,
        b: Uuid,
        c: Uuid,
        _dir: TempDir,
    }

    fn fixture(feed_capacity: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("rt.db"), &DatabaseConfig::default()).unwrap();
        let store = Arc::new(SqliteStore::new(db, feed_capacity));
        let a = store.register_user("A", &[AppRole::Customer]).unwrap().user_id;
        let b = store.register_user("B", &[AppRole::Provider]).unwrap().user_id;
        let c = store.register_user("C", &[AppRole::Provider]).unwrap().user_id;

        let config = RealtimeConfig {
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 50,
            ..RealtimeConfig::default()
        };
        let channel = RealtimeMessageChannel::new(store.clone(), &config);
        Fixture { store, channel, a, b, c, _dir: dir }
    }

    async fn send(store: &SqliteStore, from: Uuid, to: Uuid, text: &str) -> mkt_models::Message {
        store
            .insert_message(NewMessage {
                sender_id: from,
                receiver_id: to,
                booking_id: None,
                content: text.into(),
            })
            .await
            .unwrap()
    }

    async fn next_event(sub: &mut Subscription) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("timed out waiting for event")
            .expect("subscription ended")
            .expect("transport error")
    }

    #[tokio::test]
    async fn test_delivers_matching_inserts_in_commit_order() {
        let f = fixture(64);
        let mut sub = f.channel.subscribe(MessageFilter::Between(f.a, f.b)).await.unwrap();
        assert_eq!(f.channel.state(), ConnectionState::Connected);

        let m1 = send(&f.store, f.a, f.b, "one").await;
        send(&f.store, f.a, f.c, "elsewhere").await;
        let m2 = send(&f.store, f.b, f.a, "two").await;

        assert_eq!(next_event(&mut sub).await, ChannelEvent::Inserted(m1));
        assert_eq!(next_event(&mut sub).await, ChannelEvent::Inserted(m2));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_stops_delivery() {
        let f = fixture(64);
        let mut sub = f.channel.subscribe(MessageFilter::Involving(f.b)).await.unwrap();

        send(&f.store, f.a, f.b, "queued").await;
        tokio::task::yield_now().await;

        sub.unsubscribe().await;
        sub.unsubscribe().await;
        assert!(sub.next().await.is_none());

        send(&f.store, f.a, f.b, "after").await;
        assert!(sub.try_next().is_none());
        assert_eq!(f.store.feed().live_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_replaces_scope_subscription() {
        let f = fixture(64);
        let mut first = f
            .channel
            .attach(ViewScope::Chat, MessageFilter::Between(f.a, f.b))
            .await
            .unwrap();
        let mut second = f
            .channel
            .attach(ViewScope::Chat, MessageFilter::Between(f.a, f.c))
            .await
            .unwrap();

        assert!(first.handle().is_detached());
        assert_eq!(f.store.feed().live_count(), 1);
        assert_eq!(
            f.channel.scope_filter(ViewScope::Chat).await,
            Some(MessageFilter::Between(f.a, f.c))
        );

        send(&f.store, f.a, f.b, "old thread").await;
        let m = send(&f.store, f.c, f.a, "new thread").await;
        assert!(first.next().await.is_none());
        assert_eq!(next_event(&mut second).await, ChannelEvent::Inserted(m));

        assert!(f.channel.detach(ViewScope::Chat).await);
        assert!(!f.channel.detach(ViewScope::Chat).await);
    }

    #[tokio::test]
    async fn test_release_keeps_newer_scope_subscription() {
        let f = fixture(64);
        let first = f
            .channel
            .attach(ViewScope::Chat, MessageFilter::Between(f.a, f.b))
            .await
            .unwrap();
        let mut second = f
            .channel
            .attach(ViewScope::Chat, MessageFilter::Between(f.a, f.c))
            .await
            .unwrap();

        assert!(!f.channel.release(ViewScope::Chat, &first.handle()).await);
        assert_eq!(
            f.channel.scope_filter(ViewScope::Chat).await,
            Some(MessageFilter::Between(f.a, f.c))
        );
        assert!(!second.handle().is_detached());

        let m = send(&f.store, f.c, f.a, "still here").await;
        assert_eq!(next_event(&mut second).await, ChannelEvent::Inserted(m));

        assert!(f.channel.release(ViewScope::Chat, &second.handle()).await);
        assert!(second.handle().is_detached());
        assert_eq!(f.channel.scope_filter(ViewScope::Chat).await, None);
        assert_eq!(f.store.feed().live_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_resubscribes_then_resyncs() {
        let f = fixture(64);
        let mut states = f.channel.state_receiver();
        let mut sub = f.channel.subscribe(MessageFilter::Involving(f.a)).await.unwrap();

        assert_eq!(f.store.interrupt(), 1);
        assert_eq!(next_event(&mut sub).await, ChannelEvent::Resync);
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        let m = send(&f.store, f.b, f.a, "after reconnect").await;
        assert_eq!(next_event(&mut sub).await, ChannelEvent::Inserted(m));
        assert_eq!(f.store.feed().live_count(), 1);
    }

    #[tokio::test]
    async fn test_lag_emits_resync() {
        let f = fixture(2);
        let mut sub = f.channel.subscribe(MessageFilter::Involving(f.a)).await.unwrap();

        let mut last = None;
        for i in 0..6 {
            last = Some(send(&f.store, f.b, f.a, &format!("burst {i}")).await);
        }

        assert_eq!(next_event(&mut sub).await, ChannelEvent::Resync);
        let mut delivered = Vec::new();
        while let Ok(Some(Ok(ChannelEvent::Inserted(m)))) =
            tokio::time::timeout(Duration::from_millis(200), sub.next()).await
        {
            delivered.push(m);
        }
        assert_eq!(delivered.last(), last.as_ref());
    }

    #[test]
    fn test_reconnect_delay_sequence() {
        let store: Arc<dyn EntityStore> = {
            let dir = TempDir::new().unwrap();
            let db = Database::init(&dir.path().join("d.db"), &DatabaseConfig::default()).unwrap();
            Arc::new(SqliteStore::new(db, 4))
        };
        let channel = RealtimeMessageChannel::new(store, &RealtimeConfig::default());

        let d0 = channel.reconnect_delay(0);
        let d1 = channel.reconnect_delay(1);
        let d4 = channel.reconnect_delay(4);
        let d10 = channel.reconnect_delay(10);

        assert!(d0 >= Duration::from_millis(500));
        assert!(d0 <= Duration::from_millis(2000));
        assert!(d1 >= Duration::from_millis(1000));
        assert!(d4 > Duration::from_secs(5));
        assert!(d10 <= Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let f = fixture(64);
        let config = RealtimeConfig {
            reconnect_base_delay_ms: 5,
            reconnect_max_delay_ms: 5,
            reconnect_max_attempts: 1,
            ..RealtimeConfig::default()
        };
        let failing = Arc::new(FailingResubscribe {
            inner: f.store.clone(),
            refuse: AtomicBool::new(false),
        });
        let channel = RealtimeMessageChannel::new(failing.clone(), &config);
        let mut sub = channel.subscribe(MessageFilter::Involving(f.a)).await.unwrap();

        failing.refuse.store(true, Ordering::SeqCst);
        f.store.interrupt();
        let outcome = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap();
        assert!(matches!(outcome, Some(Err(MktError::TransportDisconnected))));
        assert_eq!(sub.handle().state(), ConnectionState::Failed);
        assert_eq!(channel.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_failed_subscription_does_not_mask_healthy_one() {
        let f = fixture(64);
        let config = RealtimeConfig {
            reconnect_base_delay_ms: 5,
            reconnect_max_delay_ms: 5,
            reconnect_max_attempts: 1,
            ..RealtimeConfig::default()
        };
        let failing = Arc::new(FailingResubscribe {
            inner: f.store.clone(),
            refuse: AtomicBool::new(false),
        });
        let channel = RealtimeMessageChannel::new(failing.clone(), &config);
        let mut broken = channel.subscribe(MessageFilter::Involving(f.a)).await.unwrap();

        failing.refuse.store(true, Ordering::SeqCst);
        f.store.interrupt();
        let outcome = tokio::time::timeout(Duration::from_secs(2), broken.next())
            .await
            .unwrap();
        assert!(matches!(outcome, Some(Err(MktError::TransportDisconnected))));

        failing.refuse.store(false, Ordering::SeqCst);
        let mut healthy = channel.subscribe(MessageFilter::Involving(f.b)).await.unwrap();
        assert_eq!(healthy.handle().state(), ConnectionState::Connected);
        assert_eq!(broken.handle().state(), ConnectionState::Failed);
        assert_eq!(channel.state(), ConnectionState::Failed);

        broken.unsubscribe().await;
        assert_eq!(channel.state(), ConnectionState::Connected);

        let m = send(&f.store, f.a, f.b, "still flowing").await;
        assert_eq!(next_event(&mut healthy).await, ChannelEvent::Inserted(m));

        healthy.unsubscribe().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    /// Subscribes normally until `refuse` is set.
    struct FailingResubscribe {
        inner: Arc<SqliteStore>,
        refuse: AtomicBool,
    }

    #[async_trait::async_trait]
    impl EntityStore for FailingResubscribe {
        async fn insert_booking(&self, f: mkt_models::NewBooking) -> MktResult<mkt_models::Booking> {
            self.inner.insert_booking(f).await
        }
        async fn update_booking_status(
            &self,
            id: Uuid,
            e: mkt_models::BookingStatus,
            n: mkt_models::BookingStatus,
        ) -> MktResult<mkt_models::StatusUpdate> {
            self.inner.update_booking_status(id, e, n).await
        }
        async fn get_booking(&self, id: Uuid) -> MktResult<mkt_models::Booking> {
            self.inner.get_booking(id).await
        }
        async fn list_bookings(
            &self,
            filter: mkt_models::BookingFilter,
        ) -> MktResult<Vec<mkt_models::Booking>> {
            self.inner.list_bookings(filter).await
        }
        async fn list_messages(&self, a: Uuid, b: Uuid) -> MktResult<Vec<mkt_models::Message>> {
            self.inner.list_messages(a, b).await
        }
        async fn list_messages_involving(&self, u: Uuid) -> MktResult<Vec<mkt_models::Message>> {
            self.inner.list_messages_involving(u).await
        }
        async fn insert_message(&self, f: NewMessage) -> MktResult<mkt_models::Message> {
            self.inner.insert_message(f).await
        }
        async fn mark_messages_read(&self, r: Uuid, s: Uuid) -> MktResult<Vec<Uuid>> {
            self.inner.mark_messages_read(r, s).await
        }
        async fn insert_review(
            &self,
            f: mkt_models::NewReview,
        ) -> MktResult<mkt_models::ReviewInsert> {
            self.inner.insert_review(f).await
        }
        async fn find_review_for_booking(
            &self,
            id: Uuid,
        ) -> MktResult<Option<mkt_models::Review>> {
            self.inner.find_review_for_booking(id).await
        }
        async fn subscribe_changes(
            &self,
            table: Table,
            filter: MessageFilter,
        ) -> MktResult<FeedSubscription> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(MktError::TransportDisconnected);
            }
            self.inner.subscribe_changes(table, filter).await
        }
        async fn unsubscribe(&self, handle: FeedHandle) {
            self.inner.unsubscribe(handle).await
        }
    }
}
