//! Database schema definitions and table creation.
//!
//! Bookings, messages, and reviews are the three gateway records; profiles
//! and user_roles back the identity directory.

use rusqlite::Connection;
use mkt_core::error::{MktError, MktResult};
use tracing::info;

/// Create all database tables and indexes if they do not exist.
pub fn create_tables(conn: &Connection) -> MktResult<()> {
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| MktError::Database(format!("failed to create schema: {e}")))?;
    info!("database schema verified");
    Ok(())
}

/// Drop all tables (used for database reset).
pub fn drop_tables(conn: &Connection) -> MktResult<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS reviews;
         DROP TABLE IF EXISTS messages;
         DROP TABLE IF EXISTS bookings;
         DROP TABLE IF EXISTS user_roles;
         DROP TABLE IF EXISTS profiles;
         DROP TABLE IF EXISTS schema_version;",
    )
    .map_err(|e| MktError::Database(format!("failed to drop tables: {e}")))?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Profiles (one per user)
CREATE TABLE IF NOT EXISTS profiles (
    user_id     TEXT PRIMARY KEY,
    full_name   TEXT NOT NULL,
    phone       TEXT,
    avatar_url  TEXT,
    location    TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Role grants
CREATE TABLE IF NOT EXISTS user_roles (
    user_id     TEXT NOT NULL REFERENCES profiles(user_id),
    role        TEXT NOT NULL CHECK (role IN ('admin', 'customer', 'provider')),
    UNIQUE (user_id, role)
);

-- Bookings
CREATE TABLE IF NOT EXISTS bookings (
    id                  TEXT PRIMARY KEY,
    customer_id         TEXT NOT NULL REFERENCES profiles(user_id),
    provider_id         TEXT NOT NULL REFERENCES profiles(user_id),
    service_id          TEXT,
    status              TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'accepted', 'declined', 'completed', 'cancelled')),
    scheduled_at        TEXT NOT NULL,
    address             TEXT,
    description         TEXT,
    total_price_cents   INTEGER CHECK (total_price_cents IS NULL OR total_price_cents >= 0),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bookings_customer ON bookings(customer_id, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_bookings_provider ON bookings(provider_id, scheduled_at);

-- Messages
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    sender_id   TEXT NOT NULL REFERENCES profiles(user_id),
    receiver_id TEXT NOT NULL REFERENCES profiles(user_id),
    booking_id  TEXT REFERENCES bookings(id),
    content     TEXT NOT NULL,
    is_read     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    CHECK (sender_id <> receiver_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_receiver_unread ON messages(receiver_id, is_read);

-- Reviews (at most one per booking)
CREATE TABLE IF NOT EXISTS reviews (
    id          TEXT PRIMARY KEY,
    booking_id  TEXT NOT NULL UNIQUE REFERENCES bookings(id),
    customer_id TEXT NOT NULL REFERENCES profiles(user_id),
    provider_id TEXT NOT NULL REFERENCES profiles(user_id),
    rating      INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment     TEXT,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_provider ON reviews(provider_id);
"#;
