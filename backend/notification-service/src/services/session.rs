//! Auth session: follows identity transitions and resolves the role.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::identity::Identity;
use crate::models::{Role, UserId, UserProfile};
use crate::stores::ProfileStore;

/// What views know about the viewer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub role: Option<Role>,
    pub profile: Option<UserProfile>,
    pub loading: bool,
}

impl SessionState {
    pub fn loading() -> Self {
        Self {
            identity: None,
            role: None,
            profile: None,
            loading: true,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            loading: false,
            ..Self::loading()
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.identity.as_ref().map(|i| &i.user_id)
    }

    pub fn is_admin(&self) -> bool {
        self.role.map(|r| r.is_admin()).unwrap_or(false)
    }
}

/// Live session bound to one identity stream.
///
/// A single task re-resolves the role on every identity transition; dropping
/// the session stops it.
pub struct AuthSession {
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl AuthSession {
    pub fn start(
        mut identity_events: watch::Receiver<Option<Identity>>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let (tx, rx) = watch::channel(SessionState::loading());

        let task = tokio::spawn(async move {
            loop {
                let identity = identity_events.borrow_and_update().clone();
                tx.send_modify(|state| state.loading = true);

                let resolved = Self::resolve(identity, profiles.as_ref()).await;
                tx.send_replace(resolved);

                if identity_events.changed().await.is_err() {
                    // Provider dropped the session.
                    tx.send_if_modified(|state| {
                        if state.identity.is_some() {
                            *state = SessionState::signed_out();
                            true
                        } else {
                            false
                        }
                    });
                    break;
                }
            }
        });

        Self { state: rx, task }
    }

    /// One-shot resolution of `identity` into a settled state.
    pub async fn resolve(identity: Option<Identity>, profiles: &dyn ProfileStore) -> SessionState {
        let Some(identity) = identity else {
            return SessionState::signed_out();
        };

        let (role, profile) = match profiles.get(&identity.user_id).await {
            Ok(Some(profile)) => (profile.role, Some(profile)),
            Ok(None) => {
                debug!(user_id = %identity.user_id, "No profile found, defaulting role to user");
                (Role::User, None)
            }
            Err(e) => {
                warn!(user_id = %identity.user_id, error = %e, "Profile lookup failed, defaulting role to user");
                (Role::User, None)
            }
        };

        SessionState {
            identity: Some(identity),
            role: Some(role),
            profile,
            loading: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait for the first state that is not loading.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.state.clone();
        let settled = rx.wait_for(|state| !state.loading).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| rx.borrow().clone())
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::InMemoryProfileStore;
    use crate::stores::{MockProfileStore, StoreError};
    use chrono::Utc;

    fn identity(id: &str) -> Identity {
        Identity {
            user_id: UserId::new(id),
            email: format!("{}@example.com", id),
            display_name: None,
        }
    }

    fn profile(id: &str, role: Role) -> UserProfile {
        UserProfile {
            id: UserId::new(id),
            email: format!("{}@example.com", id),
            display_name: Some("Jo".to_string()),
            role,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_admin_profile_resolves_admin_role() {
        let profiles = InMemoryProfileStore::new();
        profiles.put(profile("admin-1", Role::Admin)).await.unwrap();

        let state = AuthSession::resolve(Some(identity("admin-1")), &profiles).await;
        assert!(!state.loading);
        assert_eq!(state.role, Some(Role::Admin));
        assert!(state.is_admin());
    }

    #[tokio::test]
    async fn test_missing_profile_defaults_to_user() {
        let profiles = InMemoryProfileStore::new();
        let state = AuthSession::resolve(Some(identity("u1")), &profiles).await;
        assert_eq!(state.role, Some(Role::User));
        assert!(state.profile.is_none());
    }

    #[tokio::test]
    async fn test_profile_error_degrades_to_user() {
        let mut profiles = MockProfileStore::new();
        profiles
            .expect_get()
            .returning(|_| Err(StoreError::Backend("connection reset".to_string())));

        let state = AuthSession::resolve(Some(identity("u1")), &profiles).await;
        assert!(!state.loading);
        assert_eq!(state.role, Some(Role::User));
    }

    #[tokio::test]
    async fn test_no_identity_is_signed_out() {
        let profiles = InMemoryProfileStore::new();
        let state = AuthSession::resolve(None, &profiles).await;
        assert_eq!(state, SessionState::signed_out());
    }

    #[tokio::test]
    async fn test_session_follows_identity_transitions() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles.put(profile("admin-1", Role::Admin)).await.unwrap();

        let (identity_tx, identity_rx) = watch::channel(Some(identity("admin-1")));
        let session = AuthSession::start(identity_rx, profiles.clone());

        let settled = session.settled().await;
        assert_eq!(settled.role, Some(Role::Admin));

        let mut states = session.subscribe();
        identity_tx.send_replace(None);
        let signed_out = states
            .wait_for(|s| !s.loading && s.identity.is_none())
            .await
            .unwrap()
            .clone();
        assert_eq!(signed_out.role, None);
    }

    #[tokio::test]
    async fn test_closed_identity_stream_settles_signed_out() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let (identity_tx, identity_rx) = watch::channel(Some(identity("u1")));
        let session = AuthSession::start(identity_rx, profiles);
        session.settled().await;

        drop(identity_tx);
        let mut states = session.subscribe();
        let state = states
            .wait_for(|s| s.identity.is_none())
            .await
            .unwrap()
            .clone();
        assert!(!state.loading);
    }
}
