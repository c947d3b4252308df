//! Session lifecycle.
//!
//! A [`Session`] is created when a user signs in and invalidated when they
//! sign out or another user signs in. Services take the session explicitly
//! and refuse to act on an invalidated one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use mkt_core::error::{MktError, MktResult};
use mkt_models::{AppRole, IdentityDirectory, Profile};

use crate::event_bus::{AppEvent, EventBus};

#[derive(Debug, Clone)]
struct Identity {
    profile: Profile,
    roles: Vec<AppRole>,
}

struct SessionInner {
    user_id: Uuid,
    started_at: DateTime<Utc>,
    identity: RwLock<Identity>,
    active: AtomicBool,
}

/// Signed-in user. Cheap to clone; clones share validity.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.inner.user_id)
            .field("roles", &self.roles())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Session {
    pub fn new(profile: Profile, roles: Vec<AppRole>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                user_id: profile.user_id,
                started_at: Utc::now(),
                identity: RwLock::new(Identity { profile, roles }),
                active: AtomicBool::new(true),
            }),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.inner.user_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn profile(&self) -> Profile {
        self.read_identity().profile.clone()
    }

    pub fn display_name(&self) -> String {
        self.read_identity().profile.full_name.clone()
    }

    pub fn roles(&self) -> Vec<AppRole> {
        self.read_identity().roles.clone()
    }

    pub fn has_role(&self, role: AppRole) -> bool {
        self.read_identity().roles.contains(&role)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Fail with `Forbidden` once the session has been invalidated.
    pub fn ensure_active(&self) -> MktResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(MktError::Forbidden("session has ended".into()))
        }
    }

    fn invalidate(&self) -> bool {
        self.inner.active.swap(false, Ordering::SeqCst)
    }

    fn replace_identity(&self, profile: Profile, roles: Vec<AppRole>) {
        let mut identity = self
            .inner
            .identity
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *identity = Identity { profile, roles };
    }

    fn read_identity(&self) -> std::sync::RwLockReadGuard<'_, Identity> {
        self.inner
            .identity
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Authentication state change reported by the external auth provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn { user_id: Uuid },
    SignedOut,
}

/// Owns the current session and reacts to auth changes.
pub struct SessionManager {
    directory: Arc<dyn IdentityDirectory>,
    event_bus: EventBus,
    current: tokio::sync::RwLock<Option<Session>>,
}

impl SessionManager {
    pub fn new(directory: Arc<dyn IdentityDirectory>, event_bus: EventBus) -> Self {
        Self {
            directory,
            event_bus,
            current: tokio::sync::RwLock::new(None),
        }
    }

    /// Apply an auth change.
    ///
    /// On sign-in the profile and roles are fetched before the new session
    /// is published. Any previous session is invalidated.
    pub async fn handle_auth_change(&self, change: AuthChange) -> MktResult<Option<Session>> {
        match change {
            AuthChange::SignedIn { user_id } => {
                let (profile, roles) = self.fetch_identity(user_id).await?;
                let session = Session::new(profile, roles);

                let previous = self.current.write().await.replace(session.clone());
                if let Some(previous) = previous {
                    self.end(&previous);
                }

                info!(
                    "session started for {} with roles {:?}",
                    user_id,
                    session.roles()
                );
                self.event_bus.emit(AppEvent::SessionStarted { user_id });
                Ok(Some(session))
            }
            AuthChange::SignedOut => {
                let previous = self.current.write().await.take();
                match previous {
                    Some(previous) => self.end(&previous),
                    None => debug!("sign-out with no active session"),
                }
                Ok(None)
            }
        }
    }

    /// The active session, if any.
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// The active session, or `Forbidden` when nobody is signed in.
    pub async fn require(&self) -> MktResult<Session> {
        self.current()
            .await
            .ok_or_else(|| MktError::Forbidden("not signed in".into()))
    }

    /// Re-read profile and roles for the signed-in user.
    pub async fn refresh_profile(&self) -> MktResult<Session> {
        let session = self.require().await?;
        let (profile, roles) = self.fetch_identity(session.user_id()).await?;
        session.replace_identity(profile, roles);
        debug!("refreshed profile for {}", session.user_id());
        Ok(session)
    }

    async fn fetch_identity(&self, user_id: Uuid) -> MktResult<(Profile, Vec<AppRole>)> {
        let profile = self
            .directory
            .fetch_profile(user_id)
            .await?
            .ok_or_else(|| MktError::NotFound(format!("profile {user_id}")))?;
        let roles = self.directory.fetch_roles(user_id).await?;
        Ok((profile, roles))
    }

    fn end(&self, session: &Session) {
        if session.invalidate() {
            info!("session ended for {}", session.user_id());
            self.event_bus.emit(AppEvent::SessionEnded {
                user_id: session.user_id(),
            });
        }
    }
}
