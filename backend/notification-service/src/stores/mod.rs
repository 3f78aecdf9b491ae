//! Storage seams: profiles, notifications, accounts and attachment objects.
//!
//! Each store is an async trait object so the in-memory, PostgreSQL and S3
//! adapters are interchangeable behind [`crate::app_state::AppState`].

pub mod memory;
pub mod object_store;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{NewNotification, Notification, UserId, UserProfile};

pub use s3_utils::UploadProgress;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct UploadError(pub String);

impl From<s3_utils::S3Error> for UploadError {
    fn from(err: s3_utils::S3Error) -> Self {
        UploadError(err.to_string())
    }
}

/// Which notifications a live query follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationFilter {
    /// Private notifications addressed to this user
    Recipient(UserId),
    /// Notifications with no recipient
    Broadcast,
}

impl NotificationFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        match (self, notification.recipient_id()) {
            (NotificationFilter::Recipient(user_id), Some(recipient)) => user_id == recipient,
            (NotificationFilter::Broadcast, None) => true,
            _ => false,
        }
    }
}

/// Subscription to a live-updating notification query.
///
/// Every item is the full result set, newest first. Dropping the handle
/// stops the producing task.
pub struct LiveQuery {
    rx: mpsc::Receiver<StoreResult<Vec<Notification>>>,
    task: JoinHandle<()>,
}

impl LiveQuery {
    pub fn new(rx: mpsc::Receiver<StoreResult<Vec<Notification>>>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next snapshot; `None` once the producer has stopped.
    pub async fn next_snapshot(&mut self) -> Option<StoreResult<Vec<Notification>>> {
        self.rx.recv().await
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, id: &UserId) -> StoreResult<Option<UserProfile>>;

    /// Create or replace the profile keyed by `profile.id`.
    async fn put(&self, profile: UserProfile) -> StoreResult<()>;

    /// All profiles, newest first.
    async fn list_all(&self) -> StoreResult<Vec<UserProfile>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a notification; the store assigns `id` and `created_at`.
    async fn insert(&self, notification: NewNotification) -> StoreResult<Notification>;

    /// Current result set for `filter`, newest first, without subscribing.
    async fn snapshot(&self, filter: NotificationFilter) -> StoreResult<Vec<Notification>>;

    async fn live_query(&self, filter: NotificationFilter) -> StoreResult<LiveQuery>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` to `path`, reporting progress; returns a retrievable URL.
    async fn upload_resumable(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        progress: &(dyn Fn(UploadProgress) + Send + Sync),
    ) -> Result<String, UploadError>;
}

/// Credentials record behind the local identity provider
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn create(&self, email: &str, password_hash: &str) -> StoreResult<Account>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn get(&self, id: &UserId) -> StoreResult<Option<Account>>;

    async fn update_display_name(&self, id: &UserId, display_name: &str) -> StoreResult<Account>;
}

/// Normalize an email address for lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
