//! Entity store gateway.
//!
//! The services never touch SQL. They talk to an [`EntityStore`] for the
//! three gateway records and to an [`IdentityDirectory`] for profiles and
//! roles. Conditioned writes report their outcome as explicit enums so a
//! lost race is never confused with an infrastructure failure.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mkt_core::error::MktResult;

use crate::feed::{FeedHandle, FeedSubscription, MessageFilter};
use crate::models::booking::{Booking, BookingStatus};
use crate::models::message::Message;
use crate::models::profile::{AppRole, Profile};
use crate::models::review::Review;

pub use crate::models::booking::BookingFilter;

/// Gateway tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Bookings,
    Messages,
    Reviews,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bookings => "bookings",
            Self::Messages => "messages",
            Self::Reviews => "reviews",
        })
    }
}

/// Fields of a booking at creation. Status is always pending.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub total_price_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub booking_id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub rating: i64,
    pub comment: Option<String>,
}

/// Outcome of a conditioned status write.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// The expected status held; the booking as written.
    Applied(Booking),
    /// No row matched both the id and the expected status.
    ConditionFailed,
}

/// Outcome of a review insert.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewInsert {
    Inserted(Review),
    /// A review for the booking already exists.
    UniqueConflict,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert_booking(&self, fields: NewBooking) -> MktResult<Booking>;

    /// Write `new_status` only if the booking currently has `expected`.
    async fn update_booking_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        new_status: BookingStatus,
    ) -> MktResult<StatusUpdate>;

    /// Fails with `NotFound` when the booking does not exist.
    async fn get_booking(&self, id: Uuid) -> MktResult<Booking>;

    async fn list_bookings(&self, filter: BookingFilter) -> MktResult<Vec<Booking>>;

    /// Thread between two users, oldest first.
    async fn list_messages(&self, user_a: Uuid, user_b: Uuid) -> MktResult<Vec<Message>>;

    /// Every message the user sent or received, newest first.
    async fn list_messages_involving(&self, user_id: Uuid) -> MktResult<Vec<Message>>;

    async fn insert_message(&self, fields: NewMessage) -> MktResult<Message>;

    /// Mark unread messages from `sender_id` to `receiver_id` read.
    /// Returns the ids that flipped; the count is its length.
    async fn mark_messages_read(&self, receiver_id: Uuid, sender_id: Uuid) -> MktResult<Vec<Uuid>>;

    async fn insert_review(&self, fields: NewReview) -> MktResult<ReviewInsert>;

    async fn find_review_for_booking(&self, booking_id: Uuid) -> MktResult<Option<Review>>;

    /// Open a change subscription. The subscription is live when this returns.
    async fn subscribe_changes(
        &self,
        table: Table,
        filter: MessageFilter,
    ) -> MktResult<FeedSubscription>;

    /// Detach a subscription. Unknown or already detached handles are ignored.
    async fn unsubscribe(&self, handle: FeedHandle);
}

/// Read side of the external identity provider.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn fetch_profile(&self, user_id: Uuid) -> MktResult<Option<Profile>>;

    async fn fetch_roles(&self, user_id: Uuid) -> MktResult<Vec<AppRole>>;
}
