//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mkt_core::config::{AppConfig, ConfigHandle};
use mkt_models::{AppRole, Booking, Profile, SqliteStore};
use mkt_services::{BookingDraft, ServiceRegistry, Session};
use tempfile::TempDir;

/// Users seeded into every test store.
pub struct Users {
    pub customer: Profile,
    pub provider: Profile,
    /// Holds both roles but is party to nothing by default.
    pub outsider: Profile,
}

/// Test harness: store, registry, seeded users.
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub registry: ServiceRegistry,
    pub users: Users,
    _dir: TempDir,
}

/// Create a default test configuration with fast reconnects.
pub fn create_test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.realtime.reconnect_base_delay_ms = 10;
    config.realtime.reconnect_max_delay_ms = 50;
    config.messaging.event_bus_capacity = 64;
    config
}

/// Create a temporary store with full schema and migrations applied.
/// The TempDir must be held alive for the duration of the test.
pub fn create_test_store(config: &AppConfig) -> (Arc<SqliteStore>, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test.db");
    let store = SqliteStore::open(&path, config).expect("failed to open test store");
    (Arc::new(store), dir)
}

pub async fn create_harness() -> Harness {
    let config = create_test_config();
    let (store, dir) = create_test_store(&config);

    let users = Users {
        customer: store
            .register_user("Casey Customer", &[AppRole::Customer])
            .expect("seed customer"),
        provider: store
            .register_user("Pat Provider", &[AppRole::Provider])
            .expect("seed provider"),
        outsider: store
            .register_user("Olive Outsider", &[AppRole::Customer, AppRole::Provider])
            .expect("seed outsider"),
    };

    let registry = ServiceRegistry::new(ConfigHandle::new(config), store.clone()).await;
    Harness {
        store,
        registry,
        users,
        _dir: dir,
    }
}

/// A session for `profile` that does not go through the session manager,
/// so several users can act at once.
pub async fn session_for(harness: &Harness, profile: &Profile) -> Session {
    use mkt_models::IdentityDirectory;
    let roles = harness
        .store
        .fetch_roles(profile.user_id)
        .await
        .expect("fetch roles");
    Session::new(profile.clone(), roles)
}

pub fn draft_for(provider: &Profile) -> BookingDraft {
    BookingDraft {
        provider_id: provider.user_id,
        service_id: None,
        scheduled_at: Utc::now() + chrono::Duration::days(3),
        address: Some("12 Harbour Rd".into()),
        description: Some("Deep clean".into()),
        total_price_cents: Some(8_500),
    }
}

pub async fn create_pending_booking(harness: &Harness) -> Booking {
    let customer = session_for(harness, &harness.users.customer).await;
    harness
        .registry
        .bookings
        .create_booking(&customer, draft_for(&harness.users.provider))
        .await
        .expect("create booking")
}

/// Upper bound for waiting on realtime delivery in tests.
pub const WAIT: Duration = Duration::from_secs(2);
