//! CLI command implementations.

pub mod users;
pub mod bookings;
pub mod reviews;
pub mod messages;

use std::sync::Arc;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::{style, StyledObject};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use mkt_core::config::ConfigHandle;
use mkt_core::error::{MktError, MktResult};
use mkt_models::{BookingStatus, IdentityDirectory, SqliteStore};
use mkt_services::{ServiceRegistry, Session};

use crate::OutputFormat;

/// Everything a command needs: the store, the wired services and the
/// global flags.
pub struct Context {
    pub store: Arc<SqliteStore>,
    pub registry: ServiceRegistry,
    pub format: OutputFormat,
    user: Option<Uuid>,
}

impl Context {
    /// Open the configured database and wire the services over it.
    pub async fn open(config: ConfigHandle, user: Option<Uuid>, format: OutputFormat) -> MktResult<Self> {
        let snapshot = config.read().await.clone();
        let db_path = snapshot.effective_db_path()?;
        debug!("opening store at {}", db_path.display());

        let store = Arc::new(SqliteStore::open(&db_path, &snapshot)?);
        let registry = ServiceRegistry::new(config, store.clone()).await;
        Ok(Self {
            store,
            registry,
            format,
            user,
        })
    }

    /// Sign in as the `--user` given on the command line.
    pub async fn session(&self) -> MktResult<Session> {
        let user_id = self
            .user
            .ok_or_else(|| MktError::InvalidInput("pass --user <id> to act as a user".into()))?;
        self.registry.sign_in(user_id).await
    }

    /// Display name for `user_id`, falling back to the short id.
    pub async fn name_of(&self, user_id: Uuid) -> String {
        match self.store.fetch_profile(user_id).await {
            Ok(Some(profile)) => profile.full_name,
            _ => short_id(user_id),
        }
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> MktResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A table with the shared CLI look.
pub fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// First block of a UUID, enough to tell rows apart.
pub fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub fn format_price(cents: Option<i64>) -> String {
    match cents {
        Some(c) => format!("${}.{:02}", c / 100, c % 100),
        None => "-".to_string(),
    }
}

pub fn styled_status(status: BookingStatus) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        BookingStatus::Pending => style(text).yellow(),
        BookingStatus::Accepted => style(text).cyan(),
        BookingStatus::Completed => style(text).green(),
        BookingStatus::Declined | BookingStatus::Cancelled => style(text).dim(),
    }
}

/// Truncate a string to a maximum number of characters, appending an
/// ellipsis if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(Some(8_500)), "$85.00");
        assert_eq!(format_price(Some(1_205)), "$12.05");
        assert_eq!(format_price(Some(0)), "$0.00");
        assert_eq!(format_price(None), "-");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer message body", 10), "a longe...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(short_id(id), "67e55044");
    }
}
