//! In-process store adapters, used for development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::debug;

use super::{
    normalize_email, Account, AccountStore, LiveQuery, NotificationFilter, NotificationStore,
    ObjectStore, ProfileStore, StoreError, StoreResult, UploadError, UploadProgress,
};
use crate::models::{NewNotification, Notification, NotificationId, UserId, UserProfile};

/// Buffered snapshots per live query before the producer waits.
const LIVE_QUERY_BUFFER: usize = 16;

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, id: &UserId) -> StoreResult<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(id).cloned())
    }

    async fn put(&self, profile: UserProfile) -> StoreResult<()> {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<UserProfile>> {
        let mut profiles: Vec<UserProfile> =
            self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(profiles)
    }
}

#[derive(Default)]
struct NotificationLog {
    entries: Vec<Notification>,
    last_created_at: Option<DateTime<Utc>>,
}

impl NotificationLog {
    fn snapshot(&self, filter: &NotificationFilter) -> Vec<Notification> {
        let mut matching: Vec<Notification> = self
            .entries
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
    }
}

/// Notification store whose live queries re-run on every insert.
pub struct InMemoryNotificationStore {
    log: Arc<RwLock<NotificationLog>>,
    version: watch::Sender<u64>,
}

impl Default for InMemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            log: Arc::new(RwLock::new(NotificationLog::default())),
            version,
        }
    }

    /// Everything stored so far, in insertion order.
    pub async fn all(&self) -> Vec<Notification> {
        self.log.read().await.entries.clone()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: NewNotification) -> StoreResult<Notification> {
        let mut log = self.log.write().await;

        // Timestamps are strictly increasing so recency order is total.
        let now = Utc::now();
        let created_at = match log.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        log.last_created_at = Some(created_at);

        let stored = Notification {
            id: NotificationId::generate(),
            title: notification.title,
            message: notification.message,
            sender_id: notification.sender_id,
            audience: notification.audience,
            attachment: notification.attachment,
            created_at,
        };
        log.entries.push(stored.clone());
        drop(log);

        self.version.send_modify(|v| *v += 1);
        debug!(notification_id = %stored.id, audience = stored.audience.label(), "Stored notification");
        Ok(stored)
    }

    async fn snapshot(&self, filter: NotificationFilter) -> StoreResult<Vec<Notification>> {
        Ok(self.log.read().await.snapshot(&filter))
    }

    async fn live_query(&self, filter: NotificationFilter) -> StoreResult<LiveQuery> {
        let (tx, rx) = mpsc::channel(LIVE_QUERY_BUFFER);
        let mut changes = self.version.subscribe();
        let log = self.log.clone();

        let task = tokio::spawn(async move {
            loop {
                let snapshot = log.read().await.snapshot(&filter);
                if tx.send(Ok(snapshot)).await.is_err() {
                    break;
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(LiveQuery::new(rx, task))
    }
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<UserId, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn create(&self, email: &str, password_hash: &str) -> StoreResult<Account> {
        let email = normalize_email(email);
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|a| a.email == email) {
            return Err(StoreError::Conflict(format!("account {} already exists", email)));
        }

        let account = Account {
            id: UserId::generate(),
            email,
            password_hash: password_hash.to_string(),
            display_name: None,
            created_at: Utc::now(),
        };
        accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let email = normalize_email(email);
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn get(&self, id: &UserId) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn update_display_name(&self, id: &UserId, display_name: &str) -> StoreResult<Account> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?;
        account.display_name = Some(display_name.to_string());
        Ok(account.clone())
    }
}

/// Uploaded object held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Object store that keeps bytes in memory and reports progress per chunk.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    chunk_size: usize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::with_chunk_size(64 * 1024)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects.read().await.get(path).cloned()
    }

    pub fn url_for(path: &str) -> String {
        format!("memory://{}", path)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload_resumable(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        progress: &(dyn Fn(UploadProgress) + Send + Sync),
    ) -> Result<String, UploadError> {
        if path.is_empty() {
            return Err(UploadError("object path must not be empty".to_string()));
        }

        let total_bytes = bytes.len() as u64;
        progress(UploadProgress {
            bytes_sent: 0,
            total_bytes,
        });

        let mut sent = 0u64;
        for chunk in bytes.chunks(self.chunk_size) {
            sent += chunk.len() as u64;
            progress(UploadProgress {
                bytes_sent: sent,
                total_bytes,
            });
            tokio::task::yield_now().await;
        }

        self.objects.write().await.insert(
            path.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                bytes,
            },
        );

        Ok(Self::url_for(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Audience, Role};
    use std::sync::Mutex;

    fn new_notification(title: &str, audience: Audience) -> NewNotification {
        NewNotification {
            title: title.to_string(),
            message: "Message body long enough".to_string(),
            sender_id: UserId::new("admin-1"),
            audience,
            attachment: None,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_timestamps() {
        let store = InMemoryNotificationStore::new();
        let first = store
            .insert(new_notification("First", Audience::Broadcast))
            .await
            .unwrap();
        let second = store
            .insert(new_notification("Second", Audience::Broadcast))
            .await
            .unwrap();

        assert!(second.created_at > first.created_at);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_live_query_emits_initial_and_updated_snapshots() {
        let store = InMemoryNotificationStore::new();
        let mut query = store
            .live_query(NotificationFilter::Recipient(UserId::new("u123")))
            .await
            .unwrap();

        let initial = query.next_snapshot().await.unwrap().unwrap();
        assert!(initial.is_empty());

        store
            .insert(new_notification("Broadcast", Audience::Broadcast))
            .await
            .unwrap();
        store
            .insert(new_notification(
                "Welcome",
                Audience::Private {
                    recipient_id: UserId::new("u123"),
                },
            ))
            .await
            .unwrap();

        let mut latest = Vec::new();
        while latest.is_empty() {
            latest = query.next_snapshot().await.unwrap().unwrap();
        }
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].title, "Welcome");
    }

    #[tokio::test]
    async fn test_profiles_listed_newest_first() {
        let store = InMemoryProfileStore::new();
        let older = UserProfile {
            id: UserId::new("a"),
            email: "a@example.com".to_string(),
            display_name: None,
            role: Role::User,
            created_at: Utc::now() - Duration::days(1),
        };
        let newer = UserProfile {
            id: UserId::new("b"),
            created_at: Utc::now(),
            ..older.clone()
        };
        store.put(older).await.unwrap();
        store.put(newer).await.unwrap();

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed[0].id, UserId::new("b"));
        assert_eq!(listed[1].id, UserId::new("a"));
    }

    #[tokio::test]
    async fn test_account_email_unique_case_insensitive() {
        let store = InMemoryAccountStore::new();
        store.create("Jo@Example.com", "hash").await.unwrap();

        let err = store.create("jo@example.com", "hash").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store
            .find_by_email(" JO@example.com ")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_object_upload_reports_progress() {
        let store = InMemoryObjectStore::with_chunk_size(4);
        let seen = Mutex::new(Vec::new());
        let report = |p: UploadProgress| seen.lock().unwrap().push(p.percent());

        let url = store
            .upload_resumable("notifications_attachments/a.txt", b"12345678".to_vec(), "text/plain", &report)
            .await
            .unwrap();

        assert_eq!(url, "memory://notifications_attachments/a.txt");
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 50.0, 100.0]);
        let object = store.object("notifications_attachments/a.txt").await.unwrap();
        assert_eq!(object.content_type, "text/plain");
    }
}
