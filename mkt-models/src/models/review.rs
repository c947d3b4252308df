//! Review left by a customer for a completed booking.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mkt_core::error::MktResult;

use super::{format_ts, ts_column, uuid_column};
use crate::db::db_err;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Review {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            booking_id: uuid_column(row, "booking_id")?,
            customer_id: uuid_column(row, "customer_id")?,
            provider_id: uuid_column(row, "provider_id")?,
            rating: row.get("rating")?,
            comment: row.get("comment")?,
            created_at: ts_column(row, "created_at")?,
        })
    }

    pub fn find_by_booking(conn: &Connection, booking_id: Uuid) -> MktResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM reviews WHERE booking_id = ?1",
            [booking_id.to_string()],
            Self::from_row,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Insert this review. The raw error is returned so callers can tell a
    /// uniqueness conflict apart from other failures.
    pub fn insert(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO reviews (id, booking_id, customer_id, provider_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.id.to_string(),
                self.booking_id.to_string(),
                self.customer_id.to_string(),
                self.provider_id.to_string(),
                self.rating,
                self.comment,
                format_ts(&self.created_at),
            ],
        )?;
        Ok(())
    }
}
