//! Booking lifecycle.
//!
//! Bookings move through a fixed transition table. Each edge belongs to one
//! actor role, and every write is conditioned on the status the caller
//! started from, so a transition computed from a stale read fails with
//! `StaleStateConflict` instead of overwriting a concurrent change.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use mkt_core::error::{MktError, MktResult};
use mkt_models::{
    AppRole, Booking, BookingFilter, BookingStatus, EntityStore, NewBooking, StatusUpdate,
};

use crate::event_bus::{AppEvent, EventBus};
use crate::session::Session;

/// Party acting on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Provider,
}

impl ActorRole {
    pub fn app_role(&self) -> AppRole {
        match self {
            Self::Customer => AppRole::Customer,
            Self::Provider => AppRole::Provider,
        }
    }

    /// The user holding this role on `booking`.
    pub fn party(&self, booking: &Booking) -> Uuid {
        match self {
            Self::Customer => booking.customer_id,
            Self::Provider => booking.provider_id,
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

impl FromStr for ActorRole {
    type Err = MktError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "provider" => Ok(Self::Provider),
            other => Err(MktError::InvalidInput(format!("unknown actor role '{other}'"))),
        }
    }
}

const TRANSITIONS: [(BookingStatus, BookingStatus, ActorRole); 4] = [
    (BookingStatus::Pending, BookingStatus::Accepted, ActorRole::Provider),
    (BookingStatus::Pending, BookingStatus::Declined, ActorRole::Provider),
    (BookingStatus::Pending, BookingStatus::Cancelled, ActorRole::Customer),
    (BookingStatus::Accepted, BookingStatus::Completed, ActorRole::Provider),
];

/// The actor allowed to move a booking from `from` to `to`, if the edge exists.
pub fn allowed_actor(from: BookingStatus, to: BookingStatus) -> Option<ActorRole> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, actor)| *actor)
}

/// Edges leaving `from`, with the actor each one belongs to.
pub fn transitions_from(from: BookingStatus) -> Vec<(BookingStatus, ActorRole)> {
    TRANSITIONS
        .iter()
        .filter(|(f, _, _)| *f == from)
        .map(|(_, t, actor)| (*t, *actor))
        .collect()
}

/// A request to move a booking to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRequest {
    pub booking_id: Uuid,
    pub actor: ActorRole,
    pub target: BookingStatus,
    /// Status the caller last saw. When absent, the current status is read
    /// first and used as the expected one.
    pub observed: Option<BookingStatus>,
}

impl TransitionRequest {
    pub fn new(booking_id: Uuid, actor: ActorRole, target: BookingStatus) -> Self {
        Self {
            booking_id,
            actor,
            target,
            observed: None,
        }
    }

    /// Condition the write on the status the caller saw.
    pub fn expecting(mut self, observed: BookingStatus) -> Self {
        self.observed = Some(observed);
        self
    }
}

/// Customer input for a new booking.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingDraft {
    pub provider_id: Uuid,
    pub service_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub total_price_cents: Option<i64>,
}

/// A user's bookings split for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingBuckets {
    /// Pending and accepted bookings.
    pub active: Vec<Booking>,
    /// Terminal bookings.
    pub past: Vec<Booking>,
}

pub struct BookingLifecycle {
    store: Arc<dyn EntityStore>,
    event_bus: EventBus,
}

impl BookingLifecycle {
    pub fn new(store: Arc<dyn EntityStore>, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    /// Create a pending booking with the session user as customer.
    pub async fn create_booking(&self, session: &Session, draft: BookingDraft) -> MktResult<Booking> {
        session.ensure_active()?;
        if !session.has_role(AppRole::Customer) {
            return Err(MktError::Forbidden("only customers can book".into()));
        }
        if draft.provider_id == session.user_id() {
            return Err(MktError::InvalidInput("you cannot book yourself".into()));
        }
        if matches!(draft.total_price_cents, Some(price) if price < 0) {
            return Err(MktError::InvalidInput("price must not be negative".into()));
        }

        let booking = self
            .store
            .insert_booking(NewBooking {
                customer_id: session.user_id(),
                provider_id: draft.provider_id,
                service_id: draft.service_id,
                scheduled_at: draft.scheduled_at,
                address: non_blank(draft.address),
                description: non_blank(draft.description),
                total_price_cents: draft.total_price_cents,
            })
            .await?;

        info!(
            "booking {} created by {} for provider {}",
            booking.id, booking.customer_id, booking.provider_id
        );
        self.event_bus.emit(AppEvent::BookingCreated {
            booking_id: booking.id,
            customer_id: booking.customer_id,
            provider_id: booking.provider_id,
        });
        Ok(booking)
    }

    /// Apply a status transition.
    ///
    /// Checks run in order: visibility (`NotFound`), edge exists
    /// (`IllegalTransition`), actor owns the edge (`Forbidden`), observed
    /// status still current (`StaleStateConflict`), then the conditioned
    /// write, whose failure is also a `StaleStateConflict`.
    pub async fn request_transition(
        &self,
        session: &Session,
        request: TransitionRequest,
    ) -> MktResult<Booking> {
        session.ensure_active()?;
        let booking = self.visible_booking(session, request.booking_id).await?;
        let from = request.observed.unwrap_or(booking.status);

        let edge_actor = allowed_actor(from, request.target).ok_or_else(|| {
            MktError::IllegalTransition {
                from: from.to_string(),
                to: request.target.to_string(),
            }
        })?;

        if edge_actor != request.actor {
            return Err(MktError::Forbidden(format!(
                "only the {edge_actor} can move a booking from {from} to {}",
                request.target
            )));
        }
        if !session.has_role(request.actor.app_role()) {
            return Err(MktError::Forbidden(format!(
                "you do not hold the {} role",
                request.actor
            )));
        }
        if request.actor.party(&booking) != session.user_id() {
            return Err(MktError::Forbidden(format!(
                "you are not the {} of this booking",
                request.actor
            )));
        }

        if from != booking.status {
            return Err(self.conflict(booking.id, request.target, Some(booking.status)));
        }

        match self
            .store
            .update_booking_status(booking.id, from, request.target)
            .await?
        {
            StatusUpdate::Applied(updated) => {
                info!(
                    "booking {}: {} -> {} by {}",
                    updated.id, from, updated.status, request.actor
                );
                self.event_bus.emit(AppEvent::BookingStatusChanged {
                    booking_id: updated.id,
                    from,
                    to: updated.status,
                });
                Ok(updated)
            }
            StatusUpdate::ConditionFailed => {
                let current = match self.store.get_booking(booking.id).await {
                    Ok(fresh) => Some(fresh.status),
                    Err(e) => {
                        debug!("re-fetch after conflict on {} failed: {e}", booking.id);
                        None
                    }
                };
                Err(self.conflict(booking.id, request.target, current))
            }
        }
    }

    /// Read a booking the session user is party to.
    pub async fn get(&self, session: &Session, booking_id: Uuid) -> MktResult<Booking> {
        session.ensure_active()?;
        self.visible_booking(session, booking_id).await
    }

    /// The session user's bookings, newest schedule first, split into
    /// active and past. `as_role` narrows to one side of the booking.
    pub async fn list_for_session(
        &self,
        session: &Session,
        as_role: Option<ActorRole>,
    ) -> MktResult<BookingBuckets> {
        session.ensure_active()?;
        let user_id = session.user_id();
        let filter = match as_role {
            Some(ActorRole::Customer) => BookingFilter::Customer(user_id),
            Some(ActorRole::Provider) => BookingFilter::Provider(user_id),
            None => BookingFilter::Participant(user_id),
        };

        let (past, active): (Vec<_>, Vec<_>) = self
            .store
            .list_bookings(filter)
            .await?
            .into_iter()
            .partition(|b| b.status.is_terminal());
        debug!(
            "listed {} active and {} past bookings for {user_id}",
            active.len(),
            past.len()
        );
        Ok(BookingBuckets { active, past })
    }

    async fn visible_booking(&self, session: &Session, booking_id: Uuid) -> MktResult<Booking> {
        let booking = self.store.get_booking(booking_id).await?;
        if booking.involves(session.user_id()) || session.has_role(AppRole::Admin) {
            Ok(booking)
        } else {
            Err(MktError::NotFound(format!("booking {booking_id}")))
        }
    }

    fn conflict(
        &self,
        booking_id: Uuid,
        attempted: BookingStatus,
        current: Option<BookingStatus>,
    ) -> MktError {
        warn!(
            "booking {booking_id}: {attempted} rejected, status is now {}",
            current.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into())
        );
        self.event_bus.emit(AppEvent::BookingConflict {
            booking_id,
            attempted,
            current,
        });
        MktError::StaleStateConflict {
            booking_id: booking_id.to_string(),
            attempted: attempted.to_string(),
            current: current.map(|s| s.to_string()),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
