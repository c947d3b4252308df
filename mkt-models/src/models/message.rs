//! Direct message between two users.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mkt_core::error::MktResult;

use super::{format_ts, opt_uuid_column, ts_column, uuid_column};
use crate::db::db_err;

/// A directed message. Direction is fixed at creation; `is_read` only
/// ever goes from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            sender_id: uuid_column(row, "sender_id")?,
            receiver_id: uuid_column(row, "receiver_id")?,
            booking_id: opt_uuid_column(row, "booking_id")?,
            content: row.get("content")?,
            is_read: row.get::<_, i64>("is_read")? != 0,
            created_at: ts_column(row, "created_at")?,
        })
    }

    /// Whether the user sent or received this message.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The other participant relative to `user_id`, if the user is one.
    pub fn counterpart(&self, user_id: Uuid) -> Option<Uuid> {
        if self.sender_id == user_id {
            Some(self.receiver_id)
        } else if self.receiver_id == user_id {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// Whether this message counts as unread for `user_id`.
    pub fn is_unread_for(&self, user_id: Uuid) -> bool {
        self.receiver_id == user_id && !self.is_read
    }

    pub fn find_by_id(conn: &Connection, id: Uuid) -> MktResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM messages WHERE id = ?1",
            [id.to_string()],
            Self::from_row,
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, booking_id, content, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.id.to_string(),
                self.sender_id.to_string(),
                self.receiver_id.to_string(),
                self.booking_id.map(|b| b.to_string()),
                self.content,
                self.is_read as i64,
                format_ts(&self.created_at),
            ],
        )?;
        Ok(())
    }

    /// Thread between two users in commit order.
    pub fn list_between(conn: &Connection, a: Uuid, b: Uuid) -> MktResult<Vec<Self>> {
        let mut stmt = conn
            .prepare(
                "SELECT * FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![a.to_string(), b.to_string()], Self::from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Every message the user sent or received, newest first.
    pub fn list_involving(conn: &Connection, user_id: Uuid) -> MktResult<Vec<Self>> {
        let mut stmt = conn
            .prepare(
                "SELECT * FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([user_id.to_string()], Self::from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Mark every unread message from `sender_id` to `receiver_id` as read.
    pub fn mark_read(conn: &Connection, receiver_id: Uuid, sender_id: Uuid) -> MktResult<Vec<Uuid>> {
        let mut stmt = conn
            .prepare(
                "UPDATE messages SET is_read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0
                 RETURNING id",
            )
            .map_err(db_err)?;
        let ids = stmt
            .query_map(params![receiver_id.to_string(), sender_id.to_string()], |row| {
                uuid_column(row, "id")
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(ids)
    }
}
