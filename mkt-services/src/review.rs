//! Review gate: one review per completed booking, written by its customer.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use mkt_core::constants::{RATING_MAX, RATING_MIN};
use mkt_core::error::{MktError, MktResult};
use mkt_models::{Booking, BookingStatus, EntityStore, NewReview, Review, ReviewInsert};

use crate::event_bus::{AppEvent, EventBus};
use crate::session::Session;

/// Whether the session user may review a booking, and why not.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReviewEligibility {
    Eligible,
    NotCustomer,
    NotCompleted { status: BookingStatus },
    AlreadyReviewed { review: Review },
}

impl ReviewEligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Eligible => "you can review this booking".into(),
            Self::NotCustomer => "only the customer can review a booking".into(),
            Self::NotCompleted { status } => format!("the booking is {status}, not completed"),
            Self::AlreadyReviewed { .. } => "this booking has already been reviewed".into(),
        }
    }
}

pub struct ReviewGate {
    store: Arc<dyn EntityStore>,
    event_bus: EventBus,
    max_comment_length: usize,
}

impl ReviewGate {
    pub fn new(store: Arc<dyn EntityStore>, event_bus: EventBus, max_comment_length: usize) -> Self {
        Self {
            store,
            event_bus,
            max_comment_length,
        }
    }

    /// Write the review for `booking_id`.
    ///
    /// The existence check is advisory; the store's uniqueness constraint
    /// decides concurrent submissions and the loser gets `AlreadyReviewed`.
    pub async fn submit_review(
        &self,
        session: &Session,
        booking_id: Uuid,
        rating: i64,
        comment: Option<&str>,
    ) -> MktResult<Review> {
        session.ensure_active()?;
        if !(RATING_MIN..=RATING_MAX).contains(&rating) {
            return Err(MktError::InvalidInput(format!(
                "rating must be between {RATING_MIN} and {RATING_MAX}"
            )));
        }
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        if let Some(text) = comment {
            if text.chars().count() > self.max_comment_length {
                return Err(MktError::InvalidInput(format!(
                    "comment is longer than {} characters",
                    self.max_comment_length
                )));
            }
        }

        let booking = self.party_booking(session, booking_id).await?;
        match self.check(session, &booking).await? {
            ReviewEligibility::Eligible => {}
            ReviewEligibility::AlreadyReviewed { .. } => {
                return Err(MktError::AlreadyReviewed(booking_id.to_string()))
            }
            other => return Err(MktError::Forbidden(other.reason())),
        }

        let outcome = self
            .store
            .insert_review(NewReview {
                booking_id,
                customer_id: booking.customer_id,
                provider_id: booking.provider_id,
                rating,
                comment: comment.map(String::from),
            })
            .await?;

        match outcome {
            ReviewInsert::Inserted(review) => {
                info!("review {} stored for booking {booking_id} ({rating}/5)", review.id);
                self.event_bus.emit(AppEvent::ReviewSubmitted {
                    booking_id,
                    review_id: review.id,
                    rating,
                });
                Ok(review)
            }
            ReviewInsert::UniqueConflict => {
                warn!("concurrent review for booking {booking_id} already stored");
                Err(MktError::AlreadyReviewed(booking_id.to_string()))
            }
        }
    }

    /// Explain whether the session user can review `booking_id` right now.
    pub async fn eligibility(&self, session: &Session, booking_id: Uuid) -> MktResult<ReviewEligibility> {
        session.ensure_active()?;
        let booking = self.party_booking(session, booking_id).await?;
        self.check(session, &booking).await
    }

    /// The review written for `booking_id`, if any.
    pub async fn existing_review(&self, session: &Session, booking_id: Uuid) -> MktResult<Option<Review>> {
        session.ensure_active()?;
        self.party_booking(session, booking_id).await?;
        self.store.find_review_for_booking(booking_id).await
    }

    async fn party_booking(&self, session: &Session, booking_id: Uuid) -> MktResult<Booking> {
        let booking = self.store.get_booking(booking_id).await?;
        if !booking.involves(session.user_id()) {
            return Err(MktError::NotFound(format!("booking {booking_id}")));
        }
        Ok(booking)
    }

    async fn check(&self, session: &Session, booking: &Booking) -> MktResult<ReviewEligibility> {
        if booking.customer_id != session.user_id() {
            return Ok(ReviewEligibility::NotCustomer);
        }
        if booking.status != BookingStatus::Completed {
            return Ok(ReviewEligibility::NotCompleted {
                status: booking.status,
            });
        }
        Ok(match self.store.find_review_for_booking(booking.id).await? {
            Some(review) => ReviewEligibility::AlreadyReviewed { review },
            None => ReviewEligibility::Eligible,
        })
    }
}
