//! Identity provider seam and the local (argon2 + JWT) implementation.
//!
//! Each signed-in session owns a `watch` channel carrying the current
//! [`Identity`]; sign-out publishes `None`, refresh and profile updates
//! republish the identity so subscribers re-resolve.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::models::UserId;
use crate::security::{hash_password, verify_password, Claims, JwtKeys};
use crate::stores::{Account, AccountStore, StoreError};

/// Authenticated principal as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub display_name: Option<String>,
}

impl From<&Account> for Identity {
    fn from(account: &Account) -> Self {
        Identity {
            user_id: account.id.clone(),
            email: account.email.clone(),
            display_name: account.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignedIn {
    pub identity: Identity,
    pub token: String,
    pub expires_in: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address is already in use")]
    EmailInUse,

    #[error("Invalid or expired session")]
    InvalidToken,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError>;

    /// Create credentials and sign the new user in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignedIn, AuthError>;

    /// Revoke the session behind `token`. Unknown tokens are ignored.
    async fn sign_out(&self, token: &str) -> Result<(), AuthError>;

    /// Identity behind a live session token, `None` when invalid or revoked.
    async fn current(&self, token: &str) -> Result<Option<Identity>, AuthError>;

    /// Follow the session behind `token`. The receiver starts at the current
    /// identity and yields every later transition.
    async fn on_state_change(&self, token: &str) -> watch::Receiver<Option<Identity>>;

    async fn update_display_name(
        &self,
        identity: &Identity,
        display_name: &str,
    ) -> Result<Identity, AuthError>;

    /// Re-issue the token for the same session.
    async fn refresh(&self, token: &str) -> Result<SignedIn, AuthError>;
}

/// Live session channel plus the expiry of its newest token
struct Session {
    tx: watch::Sender<Option<Identity>>,
    expires_at: i64,
}

/// Sessions and revocations are kept only while a token for them could
/// still validate; both maps are pruned on sign-in, sign-out and refresh.
pub struct LocalIdentityProvider {
    accounts: Arc<dyn AccountStore>,
    keys: JwtKeys,
    sessions: DashMap<String, Session>,
    /// Revoked session id to the expiry of its last token
    revoked: DashMap<String, i64>,
}

impl LocalIdentityProvider {
    pub fn new(accounts: Arc<dyn AccountStore>, keys: JwtKeys) -> Self {
        Self {
            accounts,
            keys,
            sessions: DashMap::new(),
            revoked: DashMap::new(),
        }
    }

    fn open_session(&self, identity: Identity) -> Result<SignedIn, AuthError> {
        self.prune_expired(Utc::now().timestamp());

        let session_id = uuid::Uuid::new_v4().to_string();
        let token = self
            .keys
            .issue(&identity.user_id, &identity.email, &session_id)?;

        let (tx, _) = watch::channel(Some(identity.clone()));
        self.sessions.insert(
            session_id,
            Session {
                tx,
                expires_at: self.token_expiry(),
            },
        );

        Ok(SignedIn {
            identity,
            token,
            expires_in: self.keys.expiry_secs(),
        })
    }

    fn token_expiry(&self) -> i64 {
        Utc::now().timestamp() + self.keys.expiry_secs()
    }

    /// Claims and identity for a valid, unrevoked token.
    async fn resolve(&self, token: &str) -> Result<Option<(Claims, Identity)>, AuthError> {
        let claims = match self.keys.validate(token) {
            Ok(claims) => claims,
            Err(_) => return Ok(None),
        };
        if self.revoked.contains_key(&claims.sid) {
            return Ok(None);
        }

        let account = self.accounts.get(&claims.user_id()).await?;
        Ok(account.map(|a| (claims, Identity::from(&a))))
    }

    /// Drop sessions and revocations whose tokens can no longer validate at
    /// `now`. Subscribers of a dropped session see it signed out.
    fn prune_expired(&self, now: i64) {
        self.sessions.retain(|session_id, session| {
            if self.keys.valid_until(session.expires_at) >= now {
                return true;
            }
            session.tx.send_replace(None);
            debug!(session_id = %session_id, "Session expired");
            false
        });
        self.revoked
            .retain(|_, expires_at| self.keys.valid_until(*expires_at) >= now);
    }
}

async fn blocking<T, F>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Internal(format!("Password task failed: {}", e)))?
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let account = self
            .accounts
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let password = password.to_string();
        let hash = account.password_hash.clone();
        blocking(move || verify_password(&password, &hash)).await?;

        info!(user_id = %account.id, "User signed in");
        self.open_session(Identity::from(&account))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let password = password.to_string();
        let hash = blocking(move || hash_password(&password)).await?;

        let account = match self.accounts.create(email, &hash).await {
            Ok(account) => account,
            Err(StoreError::Conflict(_)) => return Err(AuthError::EmailInUse),
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %account.id, "Account created");
        self.open_session(Identity::from(&account))
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let Ok(claims) = self.keys.validate(token) else {
            return Ok(());
        };

        self.prune_expired(Utc::now().timestamp());

        self.revoked.insert(claims.sid.clone(), claims.exp);
        if let Some((_, session)) = self.sessions.remove(&claims.sid) {
            session.tx.send_replace(None);
        }
        debug!(user_id = %claims.sub, "Session revoked");
        Ok(())
    }

    async fn current(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self.resolve(token).await?.map(|(_, identity)| identity))
    }

    async fn on_state_change(&self, token: &str) -> watch::Receiver<Option<Identity>> {
        match self.resolve(token).await {
            Ok(Some((claims, identity))) => self
                .sessions
                .entry(claims.sid)
                .or_insert_with(|| Session {
                    tx: watch::channel(Some(identity)).0,
                    expires_at: claims.exp,
                })
                .tx
                .subscribe(),
            // Closed channel: subscribers see a signed-out state that never changes.
            _ => watch::channel(None).1,
        }
    }

    async fn update_display_name(
        &self,
        identity: &Identity,
        display_name: &str,
    ) -> Result<Identity, AuthError> {
        let account = self
            .accounts
            .update_display_name(&identity.user_id, display_name)
            .await?;
        let updated = Identity::from(&account);

        for session in self.sessions.iter() {
            let same_user = session
                .tx
                .borrow()
                .as_ref()
                .map(|current| current.user_id == updated.user_id)
                .unwrap_or(false);
            if same_user {
                session.tx.send_replace(Some(updated.clone()));
            }
        }

        Ok(updated)
    }

    async fn refresh(&self, token: &str) -> Result<SignedIn, AuthError> {
        self.prune_expired(Utc::now().timestamp());

        let (claims, identity) = self.resolve(token).await?.ok_or(AuthError::InvalidToken)?;
        let token = self
            .keys
            .issue(&identity.user_id, &identity.email, &claims.sid)?;

        let expires_at = self.token_expiry();
        self.sessions
            .entry(claims.sid)
            .and_modify(|session| {
                session.expires_at = expires_at;
                session.tx.send_replace(Some(identity.clone()));
            })
            .or_insert_with(|| Session {
                tx: watch::channel(Some(identity.clone())).0,
                expires_at,
            });

        Ok(SignedIn {
            identity,
            token,
            expires_in: self.keys.expiry_secs(),
        })
    }
}
