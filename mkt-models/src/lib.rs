//! Marketplace Models - records, the entity store gateway, and its SQLite implementation.
//!
//! This crate owns persistence: the Booking/Message/Review/Profile records,
//! the `EntityStore` and `IdentityDirectory` traits the services talk to,
//! a SQLite-backed reference store with versioned migrations, and the
//! store-side change feed that carries message inserts.

pub mod db;
pub mod schema;
pub mod models;
pub mod migrations;
pub mod feed;
pub mod store;
pub mod sqlite_store;

// Re-export key types
pub use db::Database;
pub use models::booking::{Booking, BookingStatus};
pub use models::message::Message;
pub use models::review::Review;
pub use models::profile::{AppRole, Profile};
pub use feed::{ChangeEvent, ChangeFeed, FeedError, FeedHandle, FeedSubscription, MessageFilter};
pub use store::{
    BookingFilter, EntityStore, IdentityDirectory, NewBooking, NewMessage, NewReview,
    ReviewInsert, StatusUpdate, Table,
};
pub use sqlite_store::SqliteStore;
