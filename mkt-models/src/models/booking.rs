//! Booking record and its status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mkt_core::error::{MktError, MktResult};

use super::{format_ts, now_ts, opt_uuid_column, ts_column, uuid_column};
use crate::db::db_err;

/// Lifecycle status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Declined,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        Self::Pending,
        Self::Accepted,
        Self::Declined,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = MktError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(MktError::InvalidInput(format!("unknown booking status '{other}'"))),
        }
    }
}

/// A booking of a provider by a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Option<Uuid>,
    pub status: BookingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub address: Option<String>,
    pub description: Option<String>,
    /// Price in minor currency units, fixed at creation.
    pub total_price_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Selects which bookings a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    All,
    Customer(Uuid),
    Provider(Uuid),
    /// Bookings where the user is either party.
    Participant(Uuid),
}

impl Booking {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw_status: String = row.get("status")?;
        let status = raw_status.parse::<BookingStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            )
        })?;

        Ok(Self {
            id: uuid_column(row, "id")?,
            customer_id: uuid_column(row, "customer_id")?,
            provider_id: uuid_column(row, "provider_id")?,
            service_id: opt_uuid_column(row, "service_id")?,
            status,
            scheduled_at: ts_column(row, "scheduled_at")?,
            address: row.get("address")?,
            description: row.get("description")?,
            total_price_cents: row.get("total_price_cents")?,
            created_at: ts_column(row, "created_at")?,
            updated_at: ts_column(row, "updated_at")?,
        })
    }

    /// Whether the user is the customer or the provider of this booking.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.customer_id == user_id || self.provider_id == user_id
    }

    pub fn find_by_id(conn: &Connection, id: Uuid) -> MktResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM bookings WHERE id = ?1",
            [id.to_string()],
            Self::from_row,
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Insert this booking. Always lands as pending.
    pub fn insert(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO bookings (id, customer_id, provider_id, service_id, status, scheduled_at,
                                   address, description, total_price_cents, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.id.to_string(),
                self.customer_id.to_string(),
                self.provider_id.to_string(),
                self.service_id.map(|s| s.to_string()),
                format_ts(&self.scheduled_at),
                self.address,
                self.description,
                self.total_price_cents,
                format_ts(&self.created_at),
                format_ts(&self.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Conditioned status write. Returns the number of rows that matched
    /// both the id and the expected current status (0 or 1).
    pub fn update_status_if(
        conn: &Connection,
        id: Uuid,
        expected: BookingStatus,
        new_status: BookingStatus,
    ) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "UPDATE bookings SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                new_status.as_str(),
                format_ts(&now_ts()),
                id.to_string(),
                expected.as_str(),
            ],
        )
    }

    /// List bookings ordered by scheduled time, most recent first.
    pub fn list(conn: &Connection, filter: BookingFilter) -> MktResult<Vec<Self>> {
        let (clause, arg) = match filter {
            BookingFilter::All => ("1 = 1 OR ?1 IS NULL", None),
            BookingFilter::Customer(u) => ("customer_id = ?1", Some(u.to_string())),
            BookingFilter::Provider(u) => ("provider_id = ?1", Some(u.to_string())),
            BookingFilter::Participant(u) => {
                ("customer_id = ?1 OR provider_id = ?1", Some(u.to_string()))
            }
        };
        let sql = format!(
            "SELECT * FROM bookings WHERE {clause} ORDER BY scheduled_at DESC, id DESC"
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([arg], Self::from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{migrations, models::profile::Profile, schema};
    use chrono::Duration;

    fn setup() -> (Connection, Uuid, Uuid) {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        migrations::run_migrations(&conn).unwrap();
        let customer = Profile::new("Cust");
        let provider = Profile::new("Prov");
        customer.save(&conn).unwrap();
        provider.save(&conn).unwrap();
        (conn, customer.user_id, provider.user_id)
    }

    fn booking(customer: Uuid, provider: Uuid, offset_hours: i64) -> Booking {
        let now = now_ts();
        Booking {
            id: Uuid::new_v4(),
            customer_id: customer,
            provider_id: provider,
            service_id: None,
            status: BookingStatus::Pending,
            scheduled_at: now + Duration::hours(offset_hours),
            address: Some("1 Main St".into()),
            description: None,
            total_price_cents: Some(4_500),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_roundtrip_and_terminal() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!("archived".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_insert_and_find() {
        let (conn, c, p) = setup();
        let b = booking(c, p, 24);
        b.insert(&conn).unwrap();

        let loaded = Booking::find_by_id(&conn, b.id).unwrap().unwrap();
        assert_eq!(loaded, b);
        assert!(loaded.involves(c));
        assert!(!loaded.involves(Uuid::new_v4()));
    }

    #[test]
    fn test_conditioned_update_matches_expected_only() {
        let (conn, c, p) = setup();
        let b = booking(c, p, 1);
        b.insert(&conn).unwrap();

        let applied =
            Booking::update_status_if(&conn, b.id, BookingStatus::Pending, BookingStatus::Accepted)
                .unwrap();
        assert_eq!(applied, 1);

        let missed =
            Booking::update_status_if(&conn, b.id, BookingStatus::Pending, BookingStatus::Cancelled)
                .unwrap();
        assert_eq!(missed, 0);

        let loaded = Booking::find_by_id(&conn, b.id).unwrap().unwrap();
        assert_eq!(loaded.status, BookingStatus::Accepted);
    }

    #[test]
    fn test_list_orders_by_schedule_desc() {
        let (conn, c, p) = setup();
        let early = booking(c, p, 1);
        let late = booking(c, p, 48);
        early.insert(&conn).unwrap();
        late.insert(&conn).unwrap();

        let listed = Booking::list(&conn, BookingFilter::Customer(c)).unwrap();
        assert_eq!(listed.iter().map(|b| b.id).collect::<Vec<_>>(), vec![late.id, early.id]);

        assert_eq!(Booking::list(&conn, BookingFilter::Provider(c)).unwrap().len(), 0);
        assert_eq!(Booking::list(&conn, BookingFilter::Participant(p)).unwrap().len(), 2);
        assert_eq!(Booking::list(&conn, BookingFilter::All).unwrap().len(), 2);
    }
}
