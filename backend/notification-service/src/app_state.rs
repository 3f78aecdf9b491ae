//! Application context shared by every handler.

use anyhow::Context;
use s3_utils::S3Client;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, ObjectBackend, StoreBackend};
use crate::security::JwtKeys;
use crate::services::composer::ComposerRegistry;
use crate::services::identity::{IdentityProvider, LocalIdentityProvider};
use crate::stores::memory::{
    InMemoryAccountStore, InMemoryNotificationStore, InMemoryObjectStore, InMemoryProfileStore,
};
use crate::stores::postgres::{self, PgAccountStore, PgNotificationStore, PgProfileStore};
use crate::stores::{AccountStore, NotificationStore, ObjectStore, ProfileStore};

#[derive(Clone)]
pub struct AppState {
    pub profiles: Arc<dyn ProfileStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub composers: Arc<ComposerRegistry>,
    pub bootstrap_admin_email: Option<String>,
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        notifications: Arc<dyn NotificationStore>,
        objects: Arc<dyn ObjectStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let composers = Arc::new(ComposerRegistry::new(
            notifications.clone(),
            objects.clone(),
        ));
        Self {
            profiles,
            notifications,
            objects,
            identity,
            composers,
            bootstrap_admin_email: None,
            secure_cookies: false,
        }
    }

    /// Everything in process; used for development and tests.
    pub fn in_memory(keys: JwtKeys) -> Self {
        let accounts: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
        Self::new(
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(InMemoryNotificationStore::new()),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(LocalIdentityProvider::new(accounts, keys)),
        )
    }

    pub fn with_bootstrap_admin(mut self, email: Option<String>) -> Self {
        self.bootstrap_admin_email = email;
        self
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let keys = JwtKeys::from_secret(config.jwt.secret.as_bytes(), config.jwt.expiry_secs);

        let (accounts, profiles, notifications): (
            Arc<dyn AccountStore>,
            Arc<dyn ProfileStore>,
            Arc<dyn NotificationStore>,
        ) = match config.store {
            StoreBackend::Memory => {
                warn!("Using in-memory stores; data is lost on restart");
                (
                    Arc::new(InMemoryAccountStore::new()),
                    Arc::new(InMemoryProfileStore::new()),
                    Arc::new(InMemoryNotificationStore::new()),
                )
            }
            StoreBackend::Postgres => {
                let db = config
                    .database
                    .clone()
                    .context("database configuration missing")?;
                db.log_config();
                let pool = db_pool::create_pool(db)
                    .await
                    .context("Failed to create database pool")?;
                postgres::run_migrations(&pool)
                    .await
                    .context("Failed to run migrations")?;
                info!("Database ready");
                (
                    Arc::new(PgAccountStore::new(pool.clone())),
                    Arc::new(PgProfileStore::new(pool.clone())),
                    Arc::new(PgNotificationStore::new(pool)),
                )
            }
        };

        let objects: Arc<dyn ObjectStore> = match config.objects {
            ObjectBackend::Memory => Arc::new(InMemoryObjectStore::new()),
            ObjectBackend::S3 => {
                let client = S3Client::with_config(config.s3.clone()).await;
                if let Err(e) = client.health_check().await {
                    warn!(bucket = %config.s3.bucket, error = %e, "S3 bucket not reachable at startup");
                }
                Arc::new(client)
            }
        };

        let identity: Arc<dyn IdentityProvider> =
            Arc::new(LocalIdentityProvider::new(accounts, keys));

        let mut state = Self::new(profiles, notifications, objects, identity)
            .with_bootstrap_admin(config.bootstrap_admin_email.clone());
        state.secure_cookies = !config.app.is_development();
        Ok(state)
    }
}
