//! User profile and role grants.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mkt_core::error::{MktError, MktResult};

use super::{format_ts, now_ts, ts_column, uuid_column};
use crate::db::db_err;

/// Role granted to a user. A user may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Admin,
    Customer,
    Provider,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Customer => "customer",
            Self::Provider => "provider",
        }
    }
}

impl fmt::Display for AppRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppRole {
    type Err = MktError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "customer" => Ok(Self::Customer),
            "provider" => Ok(Self::Provider),
            other => Err(MktError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// Public profile of a marketplace user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Build an unsaved profile with a fresh user id.
    pub fn new(full_name: impl Into<String>) -> Self {
        let now = now_ts();
        Self {
            user_id: Uuid::new_v4(),
            full_name: full_name.into(),
            phone: None,
            avatar_url: None,
            location: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: uuid_column(row, "user_id")?,
            full_name: row.get("full_name")?,
            phone: row.get("phone")?,
            avatar_url: row.get("avatar_url")?,
            location: row.get("location")?,
            created_at: ts_column(row, "created_at")?,
            updated_at: ts_column(row, "updated_at")?,
        })
    }

    pub fn find_by_user_id(conn: &Connection, user_id: Uuid) -> MktResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM profiles WHERE user_id = ?1",
            [user_id.to_string()],
            Self::from_row,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Insert or update this profile.
    pub fn save(&self, conn: &Connection) -> MktResult<()> {
        conn.execute(
            "INSERT INTO profiles (user_id, full_name, phone, avatar_url, location, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                full_name = excluded.full_name,
                phone = excluded.phone,
                avatar_url = excluded.avatar_url,
                location = excluded.location,
                updated_at = excluded.updated_at",
            params![
                self.user_id.to_string(),
                self.full_name,
                self.phone,
                self.avatar_url,
                self.location,
                format_ts(&self.created_at),
                format_ts(&self.updated_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Roles granted to a user, in a stable order.
    pub fn roles(conn: &Connection, user_id: Uuid) -> MktResult<Vec<AppRole>> {
        let mut stmt = conn
            .prepare("SELECT role FROM user_roles WHERE user_id = ?1")
            .map_err(db_err)?;
        let raw = stmt
            .query_map([user_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut roles = raw
            .iter()
            .map(|r| r.parse::<AppRole>())
            .collect::<MktResult<Vec<_>>>()?;
        roles.sort();
        Ok(roles)
    }

    /// Grant a role. Granting a role twice is a no-op.
    pub fn grant_role(conn: &Connection, user_id: Uuid, role: AppRole) -> MktResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
            params![user_id.to_string(), role.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }
}
