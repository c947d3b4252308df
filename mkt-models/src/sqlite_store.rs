//! SQLite implementation of the entity store gateway.
//!
//! All writes go through one in-process gate. Message inserts are published
//! on the change feed before the gate is released, so feed order equals
//! commit order.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mkt_core::config::AppConfig;
use mkt_core::error::{MktError, MktResult};

use crate::db::{db_err, is_constraint_violation, is_trigger_abort, is_unique_violation, Database};
use crate::feed::{ChangeFeed, FeedHandle, FeedSubscription, MessageFilter};
use crate::models::booking::{Booking, BookingFilter, BookingStatus};
use crate::models::message::Message;
use crate::models::now_ts;
use crate::models::profile::{AppRole, Profile};
use crate::models::review::Review;
use crate::store::{
    EntityStore, IdentityDirectory, NewBooking, NewMessage, NewReview, ReviewInsert,
    StatusUpdate, Table,
};

pub struct SqliteStore {
    db: Database,
    feed: ChangeFeed,
    write_gate: Mutex<()>,
}

impl SqliteStore {
    pub fn new(db: Database, feed_capacity: usize) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(feed_capacity),
            write_gate: Mutex::new(()),
        }
    }

    /// Open (and migrate) the database at `path` using the given config.
    pub fn open(path: &Path, config: &AppConfig) -> MktResult<Self> {
        let db = Database::init(path, &config.database)?;
        Ok(Self::new(db, config.realtime.feed_capacity))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Drop every live change subscription, as a transport failure would.
    pub fn interrupt(&self) -> usize {
        self.feed.interrupt()
    }

    /// Create a profile and grant it roles in one transaction.
    pub fn register_user(&self, full_name: &str, roles: &[AppRole]) -> MktResult<Profile> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(MktError::InvalidInput("full name must not be empty".into()));
        }

        let _gate = self.gate();
        let profile = Profile::new(full_name);
        self.db.transaction(|conn| {
            profile.save(conn)?;
            for role in roles {
                Profile::grant_role(conn, profile.user_id, *role)?;
            }
            Ok(())
        })?;

        info!("registered user {} ({full_name})", profile.user_id);
        Ok(profile)
    }

    /// Update profile fields of an existing user.
    pub fn save_profile(&self, profile: &Profile) -> MktResult<()> {
        let _gate = self.gate();
        let conn = self.db.conn()?;
        profile.save(&conn)
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.write_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert_booking_sync(&self, fields: NewBooking) -> MktResult<Booking> {
        let now = now_ts();
        let booking = Booking {
            id: Uuid::new_v4(),
            customer_id: fields.customer_id,
            provider_id: fields.provider_id,
            service_id: fields.service_id,
            status: BookingStatus::Pending,
            scheduled_at: fields.scheduled_at,
            address: fields.address,
            description: fields.description,
            total_price_cents: fields.total_price_cents,
            created_at: now,
            updated_at: now,
        };

        let _gate = self.gate();
        let conn = self.db.conn()?;
        booking
            .insert(&conn)
            .map_err(|e| write_err(e, "booking rejected"))?;
        debug!("inserted booking {}", booking.id);
        Ok(booking)
    }

    fn update_status_sync(
        &self,
        id: Uuid,
        expected: BookingStatus,
        new_status: BookingStatus,
    ) -> MktResult<StatusUpdate> {
        let _gate = self.gate();
        self.db.transaction(|conn| {
            let matched = Booking::update_status_if(conn, id, expected, new_status).map_err(|e| {
                if is_trigger_abort(&e) {
                    MktError::IllegalTransition {
                        from: expected.to_string(),
                        to: new_status.to_string(),
                    }
                } else {
                    db_err(e)
                }
            })?;

            if matched == 0 {
                return Ok(StatusUpdate::ConditionFailed);
            }

            let booking = Booking::find_by_id(conn, id)?
                .ok_or_else(|| MktError::Internal(format!("booking {id} vanished mid-update")))?;
            Ok(StatusUpdate::Applied(booking))
        })
    }

    fn insert_message_sync(&self, fields: NewMessage) -> MktResult<Message> {
        let _gate = self.gate();
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: fields.sender_id,
            receiver_id: fields.receiver_id,
            booking_id: fields.booking_id,
            content: fields.content,
            is_read: false,
            created_at: now_ts(),
        };

        let conn = self.db.conn()?;
        message
            .insert(&conn)
            .map_err(|e| write_err(e, "message rejected"))?;
        self.feed.publish(Table::Messages, message.clone());
        Ok(message)
    }

    fn mark_read_sync(&self, receiver_id: Uuid, sender_id: Uuid) -> MktResult<Vec<Uuid>> {
        let _gate = self.gate();
        let conn = self.db.conn()?;
        Message::mark_read(&conn, receiver_id, sender_id)
    }

    fn insert_review_sync(&self, fields: NewReview) -> MktResult<ReviewInsert> {
        let review = Review {
            id: Uuid::new_v4(),
            booking_id: fields.booking_id,
            customer_id: fields.customer_id,
            provider_id: fields.provider_id,
            rating: fields.rating,
            comment: fields.comment,
            created_at: now_ts(),
        };

        let _gate = self.gate();
        let conn = self.db.conn()?;
        match review.insert(&conn) {
            Ok(()) => Ok(ReviewInsert::Inserted(review)),
            Err(e) if is_unique_violation(&e) => {
                warn!("review for booking {} lost the uniqueness race", review.booking_id);
                Ok(ReviewInsert::UniqueConflict)
            }
            Err(e) if is_trigger_abort(&e) => Err(MktError::Forbidden(format!(
                "booking {} is not completed",
                review.booking_id
            ))),
            Err(e) => Err(write_err(e, "review rejected")),
        }
    }
}

/// Constraint failures are caller errors; everything else is infrastructure.
fn write_err(e: rusqlite::Error, context: &str) -> MktError {
    if is_constraint_violation(&e) {
        MktError::InvalidInput(format!("{context}: {e}"))
    } else {
        db_err(e)
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn insert_booking(&self, fields: NewBooking) -> MktResult<Booking> {
        self.insert_booking_sync(fields)
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        new_status: BookingStatus,
    ) -> MktResult<StatusUpdate> {
        self.update_status_sync(id, expected, new_status)
    }

    async fn get_booking(&self, id: Uuid) -> MktResult<Booking> {
        let conn = self.db.conn()?;
        Booking::find_by_id(&conn, id)?.ok_or_else(|| MktError::NotFound(format!("booking {id}")))
    }

    async fn list_bookings(&self, filter: BookingFilter) -> MktResult<Vec<Booking>> {
        let conn = self.db.conn()?;
        Booking::list(&conn, filter)
    }

    async fn list_messages(&self, user_a: Uuid, user_b: Uuid) -> MktResult<Vec<Message>> {
        let conn = self.db.conn()?;
        Message::list_between(&conn, user_a, user_b)
    }

    async fn list_messages_involving(&self, user_id: Uuid) -> MktResult<Vec<Message>> {
        let conn = self.db.conn()?;
        Message::list_involving(&conn, user_id)
    }

    async fn insert_message(&self, fields: NewMessage) -> MktResult<Message> {
        self.insert_message_sync(fields)
    }

    async fn mark_messages_read(&self, receiver_id: Uuid, sender_id: Uuid) -> MktResult<Vec<Uuid>> {
        self.mark_read_sync(receiver_id, sender_id)
    }

    async fn insert_review(&self, fields: NewReview) -> MktResult<ReviewInsert> {
        self.insert_review_sync(fields)
    }

    async fn find_review_for_booking(&self, booking_id: Uuid) -> MktResult<Option<Review>> {
        let conn = self.db.conn()?;
        Review::find_by_booking(&conn, booking_id)
    }

    async fn subscribe_changes(
        &self,
        table: Table,
        filter: MessageFilter,
    ) -> MktResult<FeedSubscription> {
        if table != Table::Messages {
            return Err(MktError::InvalidInput(format!(
                "change notifications are only published for messages, not {table}"
            )));
        }
        Ok(self.feed.open(table, filter))
    }

    async fn unsubscribe(&self, handle: FeedHandle) {
        self.feed.close(handle);
    }
}

#[async_trait]
impl IdentityDirectory for SqliteStore {
    async fn fetch_profile(&self, user_id: Uuid) -> MktResult<Option<Profile>> {
        let conn = self.db.conn()?;
        Profile::find_by_user_id(&conn, user_id)
    }

    async fn fetch_roles(&self, user_id: Uuid) -> MktResult<Vec<AppRole>> {
        let conn = self.db.conn()?;
        Profile::roles(&conn, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mkt_core::config::DatabaseConfig;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("store.db"), &DatabaseConfig::default()).unwrap();
        (SqliteStore::new(db, 64), dir)
    }

    fn new_booking(customer: Uuid, provider: Uuid) -> NewBooking {
        NewBooking {
            customer_id: customer,
            provider_id: provider,
            service_id: None,
            scheduled_at: Utc::now() + Duration::days(2),
            address: None,
            description: Some("Fix the sink".into()),
            total_price_cents: Some(12_000),
        }
    }

    #[tokio::test]
    async fn test_register_user_and_directory() {
        let (store, _dir) = test_store();
        let user = store
            .register_user("  Linus  ", &[AppRole::Customer, AppRole::Provider])
            .unwrap();
        assert_eq!(user.full_name, "Linus");

        let profile = store.fetch_profile(user.user_id).await.unwrap().unwrap();
        assert_eq!(profile.user_id, user.user_id);
        assert_eq!(
            store.fetch_roles(user.user_id).await.unwrap(),
            vec![AppRole::Customer, AppRole::Provider]
        );
        assert!(store.register_user("   ", &[]).is_err());
    }

    #[tokio::test]
    async fn test_conditioned_status_update() {
        let (store, _dir) = test_store();
        let c = store.register_user("C", &[AppRole::Customer]).unwrap();
        let p = store.register_user("P", &[AppRole::Provider]).unwrap();
        let booking = store
            .insert_booking(new_booking(c.user_id, p.user_id))
            .await
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);

        let applied = store
            .update_booking_status(booking.id, BookingStatus::Pending, BookingStatus::Accepted)
            .await
            .unwrap();
        match applied {
            StatusUpdate::Applied(b) => {
                assert_eq!(b.status, BookingStatus::Accepted);
                assert!(b.updated_at >= booking.updated_at);
            }
            StatusUpdate::ConditionFailed => panic!("expected update to apply"),
        }

        let stale = store
            .update_booking_status(booking.id, BookingStatus::Pending, BookingStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(stale, StatusUpdate::ConditionFailed);
    }

    #[tokio::test]
    async fn test_store_rejects_illegal_edge() {
        let (store, _dir) = test_store();
        let c = store.register_user("C", &[AppRole::Customer]).unwrap();
        let p = store.register_user("P", &[AppRole::Provider]).unwrap();
        let booking = store
            .insert_booking(new_booking(c.user_id, p.user_id))
            .await
            .unwrap();

        let err = store
            .update_booking_status(booking.id, BookingStatus::Pending, BookingStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, MktError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_booking_is_not_found() {
        let (store, _dir) = test_store();
        let err = store.get_booking(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MktError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_booking_with_unknown_party_is_invalid() {
        let (store, _dir) = test_store();
        let c = store.register_user("C", &[AppRole::Customer]).unwrap();
        let err = store
            .insert_booking(new_booking(c.user_id, Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, MktError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_review_unique_conflict() {
        let (store, _dir) = test_store();
        let c = store.register_user("C", &[AppRole::Customer]).unwrap();
        let p = store.register_user("P", &[AppRole::Provider]).unwrap();
        let booking = store
            .insert_booking(new_booking(c.user_id, p.user_id))
            .await
            .unwrap();

        let review = NewReview {
            booking_id: booking.id,
            customer_id: c.user_id,
            provider_id: p.user_id,
            rating: 4,
            comment: None,
        };
        let early = store.insert_review(review.clone()).await.unwrap_err();
        assert!(matches!(early, MktError::Forbidden(_)));

        store
            .update_booking_status(booking.id, BookingStatus::Pending, BookingStatus::Accepted)
            .await
            .unwrap();
        store
            .update_booking_status(booking.id, BookingStatus::Accepted, BookingStatus::Completed)
            .await
            .unwrap();

        assert!(matches!(
            store.insert_review(review.clone()).await.unwrap(),
            ReviewInsert::Inserted(_)
        ));
        assert_eq!(
            store.insert_review(review).await.unwrap(),
            ReviewInsert::UniqueConflict
        );
        assert!(store.find_review_for_booking(booking.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_message_insert_is_published() {
        let (store, _dir) = test_store();
        let a = store.register_user("A", &[AppRole::Customer]).unwrap();
        let b = store.register_user("B", &[AppRole::Provider]).unwrap();

        let mut sub = store
            .subscribe_changes(Table::Messages, MessageFilter::Involving(b.user_id))
            .await
            .unwrap();

        let sent = store
            .insert_message(NewMessage {
                sender_id: a.user_id,
                receiver_id: b.user_id,
                booking_id: None,
                content: "hi".into(),
            })
            .await
            .unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.message, sent);

        store.unsubscribe(sub.handle()).await;
        store.unsubscribe(sub.handle()).await;
        assert_eq!(store.feed().live_count(), 0);
    }

    #[tokio::test]
    async fn test_only_messages_publish() {
        let (store, _dir) = test_store();
        let err = store
            .subscribe_changes(Table::Bookings, MessageFilter::Involving(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, MktError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_mark_read_returns_flipped_ids() {
        let (store, _dir) = test_store();
        let a = store.register_user("A", &[]).unwrap();
        let b = store.register_user("B", &[]).unwrap();
        let mut sent = Vec::new();
        for text in ["one", "two"] {
            let m = store
                .insert_message(NewMessage {
                    sender_id: a.user_id,
                    receiver_id: b.user_id,
                    booking_id: None,
                    content: text.into(),
                })
                .await
                .unwrap();
            sent.push(m.id);
        }
        let mut read = store.mark_messages_read(b.user_id, a.user_id).await.unwrap();
        read.sort();
        sent.sort();
        assert_eq!(read, sent);
        assert!(store.mark_messages_read(b.user_id, a.user_id).await.unwrap().is_empty());
    }
}
