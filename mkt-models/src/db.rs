//! Database initialization, connection pooling, and lifecycle management.
//!
//! Uses SQLite in WAL mode with r2d2 connection pooling.
//! Runs integrity checks on startup and applies versioned migrations.

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{info, warn, error};

use mkt_core::config::DatabaseConfig;
use mkt_core::error::{MktError, MktResult};

use crate::schema;
use crate::migrations;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database wrapper providing initialization, pooling, and lifecycle management.
#[derive(Clone)]
pub struct Database {
    pool: Arc<DbPool>,
}

impl Database {
    /// Initialize the database at the given path.
    ///
    /// Creates parent directories, builds the pool with per-connection
    /// pragmas, optionally runs an integrity check, then creates the
    /// schema and applies pending migrations.
    pub fn init(db_path: &Path, config: &DatabaseConfig) -> MktResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("initializing database at {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_customizer(Box::new(ConnectionCustomizer {
                wal_mode: config.wal_mode,
            }))
            .build(manager)
            .map_err(|e| MktError::Pool(e.to_string()))?;

        let db = Self {
            pool: Arc::new(pool),
        };

        if config.integrity_check_on_startup {
            db.run_integrity_check()?;
        }

        {
            let conn = db.conn()?;
            schema::create_tables(&conn)?;
            migrations::run_migrations(&conn)?;
        }

        info!("database initialized successfully");
        Ok(db)
    }

    /// Get a connection from the pool.
    pub fn conn(&self) -> MktResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MktError::Pool(e.to_string()))
    }

    /// Run a SQLite integrity check.
    pub fn run_integrity_check(&self) -> MktResult<()> {
        let conn = self.conn()?;
        let result: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(db_err)?;

        if result != "ok" {
            error!("database integrity check failed: {result}");
            return Err(MktError::IntegrityCheck(result));
        }

        info!("database integrity check passed");
        Ok(())
    }

    /// Execute a function within a database transaction.
    pub fn transaction<T, F>(&self, f: F) -> MktResult<T>
    where
        F: FnOnce(&Connection) -> MktResult<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let result = f(&tx)?;

        tx.commit().map_err(db_err)?;

        Ok(result)
    }

    /// Get database statistics (row counts per table).
    pub fn stats(&self) -> MktResult<DatabaseStats> {
        let conn = self.conn()?;

        let count = |table: &str| -> MktResult<i64> {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            conn.query_row(&sql, [], |row| row.get(0)).map_err(db_err)
        };

        Ok(DatabaseStats {
            profiles: count("profiles")?,
            bookings: count("bookings")?,
            messages: count("messages")?,
            reviews: count("reviews")?,
        })
    }

    /// Reset the database by dropping and recreating all tables.
    pub fn reset(&self) -> MktResult<()> {
        warn!("resetting database - all data will be lost");
        let conn = self.conn()?;
        schema::drop_tables(&conn)?;
        schema::create_tables(&conn)?;
        migrations::run_migrations(&conn)?;
        info!("database reset complete");
        Ok(())
    }
}

/// Database row count statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub profiles: i64,
    pub bookings: i64,
    pub messages: i64,
    pub reviews: i64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "profiles={}, bookings={}, messages={}, reviews={}",
            self.profiles, self.bookings, self.messages, self.reviews
        )
    }
}

/// Map a rusqlite error into the crate error type.
pub(crate) fn db_err(e: rusqlite::Error) -> MktError {
    MktError::Database(e.to_string())
}

/// Whether the error is a UNIQUE or PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// Whether the error was raised by one of the invariant triggers.
pub(crate) fn is_trigger_abort(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_TRIGGER
        }
        _ => false,
    }
}

/// Whether the error is any constraint violation (CHECK, FOREIGN KEY, ...).
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// r2d2 connection customizer that applies PRAGMA settings.
#[derive(Debug)]
struct ConnectionCustomizer {
    wal_mode: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        if self.wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }

        conn.execute_batch(
            "PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;
             PRAGMA foreign_keys=ON;",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let config = DatabaseConfig::default();
        let db = Database::init(&path, &config).unwrap();
        (db, dir)
    }

    #[test]
    fn test_database_init() {
        let (db, _dir) = test_db();
        let stats = db.stats().unwrap();
        assert_eq!(stats.bookings, 0);
        assert_eq!(stats.messages, 0);
    }

    #[test]
    fn test_integrity_check() {
        let (db, _dir) = test_db();
        assert!(db.run_integrity_check().is_ok());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (db, _dir) = test_db();
        let result: MktResult<()> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, full_name, created_at, updated_at)
                 VALUES ('u1', 'Ada', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
                [],
            )
            .map_err(db_err)?;
            Err(MktError::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().profiles, 0);
    }
}
