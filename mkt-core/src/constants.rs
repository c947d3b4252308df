//! Application-wide constants.

/// Application name, also used as the data directory name.
pub const APP_NAME: &str = "Marketplace";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Database schema version.
pub const DB_SCHEMA_VERSION: i32 = 1;

/// Lowest accepted review rating.
pub const RATING_MIN: i64 = 1;

/// Highest accepted review rating.
pub const RATING_MAX: i64 = 5;

/// Default maximum length of a chat message, in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Default maximum length of a review comment, in characters.
pub const DEFAULT_MAX_REVIEW_COMMENT_LENGTH: usize = 1000;

/// Default capacity of the in-process event bus.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Default capacity of the store change feed.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Unread counts above this are shown as "9+".
pub const UNREAD_BADGE_CAP: usize = 9;
