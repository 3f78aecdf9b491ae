//! PostgreSQL store adapters (sqlx).
//!
//! Live queries LISTEN on `notifications_changed`; the insert trigger sends
//! the recipient id (empty for broadcast) so each query only re-runs for rows
//! it can see.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    normalize_email, Account, AccountStore, LiveQuery, NotificationFilter, NotificationStore,
    ProfileStore, StoreError, StoreResult,
};
use crate::models::{
    Attachment, Audience, NewNotification, Notification, NotificationId, Role, UserId,
    UserProfile,
};

pub const NOTIFICATIONS_CHANNEL: &str = "notifications_changed";

const NOTIFICATION_COLUMNS: &str = "id, title, message, sender_id, recipient_id, \
     attachment_url, attachment_file_name, attachment_content_type, created_at";

/// Run the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: String,
    email: String,
    display_name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(UserProfile {
            id: UserId(row.id),
            email: row.email,
            display_name: row.display_name,
            role: row.role.parse::<Role>().map_err(StoreError::Backend)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: String,
    title: String,
    message: String,
    sender_id: String,
    recipient_id: Option<String>,
    attachment_url: Option<String>,
    attachment_file_name: Option<String>,
    attachment_content_type: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let attachment = match (
            row.attachment_url,
            row.attachment_file_name,
            row.attachment_content_type,
        ) {
            (Some(url), Some(file_name), Some(content_type)) => Some(Attachment {
                url,
                file_name,
                content_type,
            }),
            (None, None, None) => None,
            _ => {
                return Err(StoreError::Backend(format!(
                    "notification {} has a partial attachment",
                    row.id
                )))
            }
        };

        let audience = match row.recipient_id {
            Some(recipient_id) => Audience::Private {
                recipient_id: UserId(recipient_id),
            },
            None => Audience::Broadcast,
        };

        Ok(Notification {
            id: NotificationId(row.id),
            title: row.title,
            message: row.message,
            sender_id: UserId(row.sender_id),
            audience,
            attachment,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: String,
    email: String,
    password_hash: String,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: UserId(row.id),
            email: row.email,
            password_hash: row.password_hash,
            display_name: row.display_name,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn get(&self, id: &UserId) -> StoreResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, email, display_name, role, created_at FROM user_profiles WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserProfile::try_from).transpose()
    }

    async fn put(&self, profile: UserProfile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (id, email, display_name, role, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                role = EXCLUDED.role
            "#,
        )
        .bind(profile.id.as_str())
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(profile.role.as_str())
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<UserProfile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, email, display_name, role, created_at FROM user_profiles \
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserProfile::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn fetch_snapshot(pool: &PgPool, filter: &NotificationFilter) -> StoreResult<Vec<Notification>> {
    let rows = match filter {
        NotificationFilter::Recipient(user_id) => {
            sqlx::query_as::<_, NotificationRow>(&format!(
                "SELECT {} FROM notifications WHERE recipient_id = $1 ORDER BY created_at DESC",
                NOTIFICATION_COLUMNS
            ))
            .bind(user_id.as_str())
            .fetch_all(pool)
            .await?
        }
        NotificationFilter::Broadcast => {
            sqlx::query_as::<_, NotificationRow>(&format!(
                "SELECT {} FROM notifications WHERE recipient_id IS NULL ORDER BY created_at DESC",
                NOTIFICATION_COLUMNS
            ))
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(Notification::try_from).collect()
}

/// Whether a change notification with `payload` can affect `filter`.
fn is_relevant(filter: &NotificationFilter, payload: &str) -> bool {
    match filter {
        NotificationFilter::Recipient(user_id) => payload == user_id.as_str(),
        NotificationFilter::Broadcast => payload.is_empty(),
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, notification: NewNotification) -> StoreResult<Notification> {
        let (url, file_name, content_type) = match notification.attachment {
            Some(a) => (Some(a.url), Some(a.file_name), Some(a.content_type)),
            None => (None, None, None),
        };

        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            INSERT INTO notifications
                (id, title, message, sender_id, recipient_id,
                 attachment_url, attachment_file_name, attachment_content_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(NotificationId::generate().as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.sender_id.as_str())
        .bind(notification.audience.recipient_id().map(UserId::as_str))
        .bind(url)
        .bind(file_name)
        .bind(content_type)
        .fetch_one(&self.pool)
        .await?;

        Notification::try_from(row)
    }

    async fn snapshot(&self, filter: NotificationFilter) -> StoreResult<Vec<Notification>> {
        fetch_snapshot(&self.pool, &filter).await
    }

    async fn live_query(&self, filter: NotificationFilter) -> StoreResult<LiveQuery> {
        // Listen before the first read so no insert falls between the two.
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFICATIONS_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(16);
        let pool = self.pool.clone();

        let task = tokio::spawn(async move {
            loop {
                let snapshot = fetch_snapshot(&pool, &filter).await;
                if tx.send(snapshot).await.is_err() {
                    break;
                }

                loop {
                    match listener.recv().await {
                        Ok(notification) if is_relevant(&filter, notification.payload()) => {
                            debug!(?filter, "Live query invalidated");
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "Notification listener interrupted; re-querying");
                            if tx.send(Err(StoreError::from(e))).await.is_err() {
                                return;
                            }
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(LiveQuery::new(rx, task))
    }
}

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, email: &str, password_hash: &str) -> StoreResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO user_accounts (id, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash, display_name, created_at
            "#,
        )
        .bind(UserId::generate().as_str())
        .bind(normalize_email(email))
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, email, password_hash, display_name, created_at \
             FROM user_accounts WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn get(&self, id: &UserId) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, email, password_hash, display_name, created_at \
             FROM user_accounts WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn update_display_name(&self, id: &UserId, display_name: &str) -> StoreResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            UPDATE user_accounts SET display_name = $2 WHERE id = $1
            RETURNING id, email, password_hash, display_name, created_at
            "#,
        )
        .bind(id.as_str())
        .bind(display_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::from)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> NotificationRow {
        NotificationRow {
            id: "n1".to_string(),
            title: "Maintenance".to_string(),
            message: "System will be down at 10pm tonight for updates.".to_string(),
            sender_id: "admin-1".to_string(),
            recipient_id: None,
            attachment_url: None,
            attachment_file_name: None,
            attachment_content_type: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_without_recipient_is_broadcast() {
        let notification = Notification::try_from(row()).unwrap();
        assert_eq!(notification.audience, Audience::Broadcast);
        assert!(notification.attachment.is_none());
    }

    #[test]
    fn test_row_with_full_attachment() {
        let notification = Notification::try_from(NotificationRow {
            recipient_id: Some("u123".to_string()),
            attachment_url: Some("https://cdn/x.pdf".to_string()),
            attachment_file_name: Some("x.pdf".to_string()),
            attachment_content_type: Some("application/pdf".to_string()),
            ..row()
        })
        .unwrap();

        assert_eq!(notification.recipient_id(), Some(&UserId::new("u123")));
        assert_eq!(notification.attachment.unwrap().file_name, "x.pdf");
    }

    #[test]
    fn test_partial_attachment_rejected() {
        let result = Notification::try_from(NotificationRow {
            attachment_url: Some("https://cdn/x.pdf".to_string()),
            ..row()
        });
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_listener_payload_relevance() {
        let mine = NotificationFilter::Recipient(UserId::new("u123"));
        assert!(is_relevant(&mine, "u123"));
        assert!(!is_relevant(&mine, "u999"));
        assert!(!is_relevant(&mine, ""));
        assert!(is_relevant(&NotificationFilter::Broadcast, ""));
        assert!(!is_relevant(&NotificationFilter::Broadcast, "u123"));
    }

    #[test]
    fn test_unknown_role_is_backend_error() {
        let result = UserProfile::try_from(ProfileRow {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            display_name: None,
            role: "superuser".to_string(),
            created_at: Utc::now(),
        });
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_migration_indexes_both_feed_sources() {
        let schema = include_str!("../../migrations/0001_init.sql");
        assert!(schema.contains("ON notifications (recipient_id, created_at DESC)"));
        assert!(schema.contains(
            "ON notifications (created_at DESC)\n    WHERE recipient_id IS NULL"
        ));
    }
}
