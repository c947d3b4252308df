//! Versioned database migrations.
//!
//! Migrations run sequentially from the current stored version to the latest.
//! Version 1 installs the triggers that hold the record invariants at the
//! storage layer, so a write that bypasses the services still cannot move a
//! booking along an edge outside the transition table.

use rusqlite::Connection;
use tracing::{info, warn};
use mkt_core::error::{MktError, MktResult};
use mkt_core::constants::DB_SCHEMA_VERSION;

/// Run all pending migrations on the database.
pub fn run_migrations(conn: &Connection) -> MktResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version >= DB_SCHEMA_VERSION {
        info!("database schema is up to date (version {current_version})");
        return Ok(());
    }

    info!("running migrations from version {current_version} to {DB_SCHEMA_VERSION}");

    for version in (current_version + 1)..=DB_SCHEMA_VERSION {
        run_migration(conn, version)?;
    }

    set_schema_version(conn, DB_SCHEMA_VERSION)?;
    info!("migrations complete, schema at version {DB_SCHEMA_VERSION}");
    Ok(())
}

fn get_schema_version(conn: &Connection) -> MktResult<i32> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| MktError::Database(e.to_string()))?;

    if count == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])
            .map_err(|e| MktError::Database(e.to_string()))?;
        return Ok(0);
    }

    conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
        row.get(0)
    })
    .map_err(|e| MktError::Database(e.to_string()))
}

fn set_schema_version(conn: &Connection, version: i32) -> MktResult<()> {
    conn.execute("UPDATE schema_version SET version = ?1", [version])
        .map_err(|e| MktError::Database(e.to_string()))?;
    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> MktResult<()> {
    info!("applying migration version {version}");

    match version {
        1 => migration_v1(conn),
        _ => {
            warn!("unknown migration version {version}, skipping");
            Ok(())
        }
    }
}

/// Migration v1: invariant triggers.
fn migration_v1(conn: &Connection) -> MktResult<()> {
    conn.execute_batch(INVARIANT_TRIGGERS_SQL)
        .map_err(|e| MktError::Migration(format!("v1 triggers: {e}")))?;
    Ok(())
}

const INVARIANT_TRIGGERS_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS bookings_start_pending
BEFORE INSERT ON bookings
WHEN NEW.status <> 'pending'
BEGIN
    SELECT RAISE(ABORT, 'bookings must be created pending');
END;

CREATE TRIGGER IF NOT EXISTS bookings_status_edges
BEFORE UPDATE OF status ON bookings
WHEN NEW.status <> OLD.status
 AND NOT ((OLD.status = 'pending' AND NEW.status IN ('accepted', 'declined', 'cancelled'))
       OR (OLD.status = 'accepted' AND NEW.status = 'completed'))
BEGIN
    SELECT RAISE(ABORT, 'illegal booking transition');
END;

CREATE TRIGGER IF NOT EXISTS bookings_price_immutable
BEFORE UPDATE OF total_price_cents ON bookings
WHEN NEW.total_price_cents IS NOT OLD.total_price_cents
BEGIN
    SELECT RAISE(ABORT, 'total price is immutable');
END;

CREATE TRIGGER IF NOT EXISTS bookings_no_delete
BEFORE DELETE ON bookings
BEGIN
    SELECT RAISE(ABORT, 'bookings are retained');
END;

CREATE TRIGGER IF NOT EXISTS messages_read_monotonic
BEFORE UPDATE OF is_read ON messages
WHEN OLD.is_read = 1 AND NEW.is_read = 0
BEGIN
    SELECT RAISE(ABORT, 'read flag cannot be cleared');
END;

CREATE TRIGGER IF NOT EXISTS messages_direction_fixed
BEFORE UPDATE OF sender_id, receiver_id ON messages
WHEN NEW.sender_id <> OLD.sender_id OR NEW.receiver_id <> OLD.receiver_id
BEGIN
    SELECT RAISE(ABORT, 'message direction is fixed');
END;

CREATE TRIGGER IF NOT EXISTS reviews_require_completed
BEFORE INSERT ON reviews
WHEN (SELECT status FROM bookings WHERE id = NEW.booking_id) IS NOT 'completed'
BEGIN
    SELECT RAISE(ABORT, 'booking is not completed');
END;

CREATE TRIGGER IF NOT EXISTS reviews_immutable
BEFORE UPDATE ON reviews
BEGIN
    SELECT RAISE(ABORT, 'reviews are immutable');
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO profiles (user_id, full_name, created_at, updated_at)
                 VALUES ('c', 'Cust', 't', 't'), ('p', 'Prov', 't', 't');
             INSERT INTO bookings (id, customer_id, provider_id, scheduled_at, total_price_cents, created_at, updated_at)
                 VALUES ('b1', 'c', 'p', 't', 5000, 't', 't');",
        )
        .unwrap();
        conn
    }

    fn status_of(conn: &Connection) -> String {
        conn.query_row("SELECT status FROM bookings WHERE id = 'b1'", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_migrations_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, DB_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn test_trigger_rejects_terminal_exit() {
        let conn = migrated();
        conn.execute("UPDATE bookings SET status = 'cancelled' WHERE id = 'b1'", [])
            .unwrap();
        let err = conn
            .execute("UPDATE bookings SET status = 'accepted' WHERE id = 'b1'", [])
            .unwrap_err();
        assert!(crate::db::is_trigger_abort(&err));
        assert_eq!(status_of(&conn), "cancelled");
    }

    #[test]
    fn test_trigger_rejects_skipping_accept() {
        let conn = migrated();
        assert!(conn
            .execute("UPDATE bookings SET status = 'completed' WHERE id = 'b1'", [])
            .is_err());
        assert_eq!(status_of(&conn), "pending");
    }

    #[test]
    fn test_trigger_rejects_repricing() {
        let conn = migrated();
        assert!(conn
            .execute("UPDATE bookings SET total_price_cents = 1 WHERE id = 'b1'", [])
            .is_err());
    }

    #[test]
    fn test_trigger_rejects_review_before_completion() {
        let conn = migrated();
        let err = conn
            .execute(
                "INSERT INTO reviews (id, booking_id, customer_id, provider_id, rating, created_at)
                 VALUES ('r1', 'b1', 'c', 'p', 5, 't')",
                [],
            )
            .unwrap_err();
        assert!(crate::db::is_trigger_abort(&err));
    }

    #[test]
    fn test_trigger_keeps_read_flag_monotonic() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, is_read, created_at)
             VALUES ('m1', 'c', 'p', 'hi', 1, 't')",
            [],
        )
        .unwrap();
        assert!(conn
            .execute("UPDATE messages SET is_read = 0 WHERE id = 'm1'", [])
            .is_err());
    }
}
