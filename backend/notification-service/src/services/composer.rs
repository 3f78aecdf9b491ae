//! Notification composer: validate, authorize, upload, then persist.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use validator::Validate;

use super::session::SessionState;
use crate::error::field_errors;
use crate::metrics;
use crate::models::{Attachment, Audience, NewNotification, Notification, UserId};
use crate::stores::{NotificationStore, ObjectStore, UploadError, UploadProgress};
use error_types::FieldErrors;

pub const ATTACHMENT_PREFIX: &str = "notifications_attachments";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct NotificationForm {
    #[validate(length(min = 3, max = 100))]
    pub title: String,
    #[validate(length(min = 10, max = 1000))]
    pub message: String,
}

/// Target chosen by the route, never by free-text input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeMode {
    Broadcast,
    Private { recipient_id: UserId },
}

impl ComposeMode {
    pub fn audience(&self) -> Audience {
        match self {
            ComposeMode::Broadcast => Audience::Broadcast,
            ComposeMode::Private { recipient_id } => Audience::Private {
                recipient_id: recipient_id.clone(),
            },
        }
    }

    pub fn label(&self) -> &'static str {
        self.audience().label()
    }

    /// Key of the form instance: `broadcast` or the recipient id.
    pub fn form_key(&self) -> String {
        match self {
            ComposeMode::Broadcast => "broadcast".to_string(),
            ComposeMode::Private { recipient_id } => recipient_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("You are not authorized to send notifications.")]
    Unauthorized,

    #[error("A notification is already being sent from this form")]
    Busy,

    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error("{0}")]
    Transport(String),
}

/// Object key for an attachment: unique prefix plus a path-safe file name.
pub fn attachment_path(file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('.');
    let sanitized = if sanitized.is_empty() {
        "attachment"
    } else {
        sanitized
    };

    format!("{}/{}_{}", ATTACHMENT_PREFIX, uuid::Uuid::new_v4(), sanitized)
}

struct ResetProgress<'a>(&'a watch::Sender<Option<f64>>);

impl Drop for ResetProgress<'_> {
    fn drop(&mut self) {
        self.0.send_replace(None);
    }
}

/// One compose form. At most one submission runs at a time.
pub struct NotificationComposer {
    mode: ComposeMode,
    notifications: Arc<dyn NotificationStore>,
    objects: Arc<dyn ObjectStore>,
    in_flight: Mutex<()>,
    progress: watch::Sender<Option<f64>>,
}

impl NotificationComposer {
    pub fn new(
        mode: ComposeMode,
        notifications: Arc<dyn NotificationStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            mode,
            notifications,
            objects,
            in_flight: Mutex::new(()),
            progress,
        }
    }

    pub fn mode(&self) -> &ComposeMode {
        &self.mode
    }

    /// Upload percentage while an attachment is in flight.
    pub fn progress(&self) -> watch::Receiver<Option<f64>> {
        self.progress.subscribe()
    }

    pub fn current_progress(&self) -> Option<f64> {
        *self.progress.borrow()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    pub async fn submit(
        &self,
        session: &SessionState,
        form: NotificationForm,
        attachment: Option<AttachmentUpload>,
    ) -> Result<Notification, ComposeError> {
        form.validate()
            .map_err(|e| ComposeError::Validation(field_errors(&e)))?;

        let sender_id = match session.user_id() {
            Some(user_id) if session.is_admin() => user_id.clone(),
            other => {
                warn!(user_id = ?other, "Rejected notification from non-admin");
                return Err(ComposeError::Unauthorized);
            }
        };

        let _in_flight = self.in_flight.try_lock().map_err(|_| ComposeError::Busy)?;
        let _reset = ResetProgress(&self.progress);

        let attachment = match attachment {
            Some(upload) => Some(self.upload(upload).await?),
            None => None,
        };

        let stored = self
            .notifications
            .insert(NewNotification {
                title: form.title,
                message: form.message,
                sender_id,
                audience: self.mode.audience(),
                attachment,
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to store notification");
                ComposeError::Transport(e.to_string())
            })?;

        metrics::record_notification_created(self.mode.label());
        info!(
            notification_id = %stored.id,
            audience = self.mode.label(),
            sender_id = %stored.sender_id,
            "Notification sent"
        );
        Ok(stored)
    }

    async fn upload(&self, upload: AttachmentUpload) -> Result<Attachment, ComposeError> {
        let path = attachment_path(&upload.file_name);
        let content_type = if upload.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            upload.content_type
        };

        self.progress.send_replace(Some(0.0));
        let progress = &self.progress;
        let report = move |p: UploadProgress| {
            progress.send_replace(Some(p.percent()));
        };

        match self
            .objects
            .upload_resumable(&path, upload.bytes, &content_type, &report)
            .await
        {
            Ok(url) => {
                metrics::record_attachment_upload("success");
                Ok(Attachment {
                    url,
                    file_name: upload.file_name,
                    content_type,
                })
            }
            Err(e) => {
                metrics::record_attachment_upload("failure");
                warn!(path = %path, error = %e, "Attachment upload failed");
                Err(e.into())
            }
        }
    }
}

/// Composer instances keyed by (admin, form), so progress and the in-flight
/// guard belong to one form.
pub struct ComposerRegistry {
    notifications: Arc<dyn NotificationStore>,
    objects: Arc<dyn ObjectStore>,
    composers: DashMap<(UserId, String), Arc<NotificationComposer>>,
}

impl ComposerRegistry {
    pub fn new(notifications: Arc<dyn NotificationStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            notifications,
            objects,
            composers: DashMap::new(),
        }
    }

    pub fn composer_for(&self, admin: &UserId, mode: ComposeMode) -> Arc<NotificationComposer> {
        self.composers
            .entry((admin.clone(), mode.form_key()))
            .or_insert_with(|| {
                Arc::new(NotificationComposer::new(
                    mode,
                    self.notifications.clone(),
                    self.objects.clone(),
                ))
            })
            .clone()
    }

    pub fn find(&self, admin: &UserId, form_key: &str) -> Option<Arc<NotificationComposer>> {
        self.composers
            .get(&(admin.clone(), form_key.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Hand back a composer once its request is done. The entry is dropped
    /// when no submission is in flight and nobody else holds it.
    pub fn release(&self, admin: &UserId, composer: Arc<NotificationComposer>) {
        let key = (admin.clone(), composer.mode().form_key());
        drop(composer);
        if self
            .composers
            .remove_if(&key, |_, c| Arc::strong_count(c) == 1 && !c.is_submitting())
            .is_some()
        {
            debug!(admin_id = %admin, form = %key.1, "Composer released");
        }
    }

    pub fn len(&self) -> usize {
        self.composers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.composers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::identity::Identity;
    use crate::stores::memory::{InMemoryNotificationStore, InMemoryObjectStore};
    use crate::stores::{MockNotificationStore, StoreError};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn session(role: Role) -> SessionState {
        SessionState {
            identity: Some(Identity {
                user_id: UserId::new("admin-1"),
                email: "admin@example.com".to_string(),
                display_name: Some("Admin".to_string()),
            }),
            role: Some(role),
            profile: None,
            loading: false,
        }
    }

    fn form(title: &str, message: &str) -> NotificationForm {
        NotificationForm {
            title: title.to_string(),
            message: message.to_string(),
        }
    }

    fn untouched_store() -> Arc<dyn NotificationStore> {
        let mut store = MockNotificationStore::new();
        store.expect_insert().times(0);
        Arc::new(store)
    }

    struct FailingObjectStore;

    #[async_trait]
    impl ObjectStore for FailingObjectStore {
        async fn upload_resumable(
            &self,
            _path: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
            _progress: &(dyn Fn(UploadProgress) + Send + Sync),
        ) -> Result<String, UploadError> {
            Err(UploadError("storage/unauthorized".to_string()))
        }
    }

    struct GatedObjectStore {
        release: Notify,
    }

    #[async_trait]
    impl ObjectStore for GatedObjectStore {
        async fn upload_resumable(
            &self,
            path: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
            progress: &(dyn Fn(UploadProgress) + Send + Sync),
        ) -> Result<String, UploadError> {
            progress(UploadProgress {
                bytes_sent: 1,
                total_bytes: 2,
            });
            self.release.notified().await;
            Ok(format!("memory://{}", path))
        }
    }

    fn upload() -> AttachmentUpload {
        AttachmentUpload {
            file_name: "release notes.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.4".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_short_title_rejected_without_insert() {
        let composer = NotificationComposer::new(
            ComposeMode::Broadcast,
            untouched_store(),
            Arc::new(InMemoryObjectStore::new()),
        );

        let err = composer
            .submit(&session(Role::Admin), form("Hi", "Long enough message body"), None)
            .await
            .unwrap_err();

        match err {
            ComposeError::Validation(fields) => assert_eq!(
                fields["title"],
                vec!["Title must be at least 3 characters.".to_string()]
            ),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_length_bounds() {
        let composer = NotificationComposer::new(
            ComposeMode::Broadcast,
            untouched_store(),
            Arc::new(InMemoryObjectStore::new()),
        );
        let admin = session(Role::Admin);

        for (title, message) in [
            ("x".repeat(101), "Long enough message body".to_string()),
            ("Valid title".to_string(), "too short".to_string()),
            ("Valid title".to_string(), "m".repeat(1001)),
        ] {
            let result = composer.submit(&admin, form(&title, &message), None).await;
            assert!(matches!(result, Err(ComposeError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_boundary_lengths_accepted() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let composer = NotificationComposer::new(
            ComposeMode::Broadcast,
            store.clone(),
            Arc::new(InMemoryObjectStore::new()),
        );
        let admin = session(Role::Admin);

        composer
            .submit(&admin, form("abc", &"m".repeat(10)), None)
            .await
            .unwrap();
        composer
            .submit(&admin, form(&"t".repeat(100), &"m".repeat(1000)), None)
            .await
            .unwrap();

        assert_eq!(store.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_non_admin_rejected_without_insert() {
        let composer = NotificationComposer::new(
            ComposeMode::Broadcast,
            untouched_store(),
            Arc::new(InMemoryObjectStore::new()),
        );

        let result = composer
            .submit(
                &session(Role::User),
                form("Maintenance", "System will be down at 10pm tonight for updates."),
                None,
            )
            .await;
        assert!(matches!(result, Err(ComposeError::Unauthorized)));

        let signed_out = composer
            .submit(
                &SessionState::signed_out(),
                form("Maintenance", "System will be down at 10pm tonight for updates."),
                None,
            )
            .await;
        assert!(matches!(signed_out, Err(ComposeError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_private_submission_targets_recipient() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let composer = NotificationComposer::new(
            ComposeMode::Private {
                recipient_id: UserId::new("u123"),
            },
            store.clone(),
            Arc::new(InMemoryObjectStore::new()),
        );

        let stored = composer
            .submit(
                &session(Role::Admin),
                form("Welcome", "Thanks for joining the platform!"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(stored.recipient_id(), Some(&UserId::new("u123")));
        assert_eq!(stored.sender_id, UserId::new("admin-1"));
        assert!(stored.attachment.is_none());
    }

    #[tokio::test]
    async fn test_attachment_uploaded_before_insert() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let composer =
            NotificationComposer::new(ComposeMode::Broadcast, store.clone(), objects.clone());

        let stored = composer
            .submit(
                &session(Role::Admin),
                form("Release", "Release notes are attached below."),
                Some(upload()),
            )
            .await
            .unwrap();

        let attachment = stored.attachment.unwrap();
        assert_eq!(attachment.file_name, "release notes.pdf");
        assert_eq!(attachment.content_type, "application/pdf");
        assert!(attachment
            .url
            .starts_with("memory://notifications_attachments/"));
        assert!(attachment.url.ends_with("_release_notes.pdf"));

        let path = attachment.url.trim_start_matches("memory://");
        assert!(objects.object(path).await.is_some());
        assert_eq!(composer.current_progress(), None);
    }

    #[tokio::test]
    async fn test_upload_failure_writes_nothing() {
        let composer = NotificationComposer::new(
            ComposeMode::Broadcast,
            untouched_store(),
            Arc::new(FailingObjectStore),
        );

        let err = composer
            .submit(
                &session(Role::Admin),
                form("Release", "Release notes are attached below."),
                Some(upload()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "storage/unauthorized");
        assert_eq!(composer.current_progress(), None);
        assert!(!composer.is_submitting());
    }

    #[tokio::test]
    async fn test_insert_failure_surfaces_message() {
        let mut store = MockNotificationStore::new();
        store
            .expect_insert()
            .times(1)
            .returning(|_| Err(StoreError::Backend("permission-denied".to_string())));
        let composer = NotificationComposer::new(
            ComposeMode::Broadcast,
            Arc::new(store),
            Arc::new(InMemoryObjectStore::new()),
        );

        let err = composer
            .submit(
                &session(Role::Admin),
                form("Maintenance", "System will be down at 10pm tonight for updates."),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Transport(ref m) if m == "permission-denied"));
    }

    #[tokio::test]
    async fn test_second_submission_while_in_flight_is_busy() {
        let objects = Arc::new(GatedObjectStore {
            release: Notify::new(),
        });
        let store = Arc::new(InMemoryNotificationStore::new());
        let composer =
            NotificationComposer::new(ComposeMode::Broadcast, store.clone(), objects.clone());
        let admin = session(Role::Admin);

        let first = composer.submit(
            &admin,
            form("Release", "Release notes are attached below."),
            Some(upload()),
        );
        let second = async {
            while !composer.is_submitting() {
                tokio::task::yield_now().await;
            }
            assert_eq!(composer.current_progress(), Some(50.0));
            let result = composer
                .submit(
                    &admin,
                    form("Release", "Release notes are attached below."),
                    None,
                )
                .await;
            objects.release.notify_one();
            result
        };

        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert!(matches!(second, Err(ComposeError::Busy)));
        assert_eq!(store.all().await.len(), 1);
    }

    #[test]
    fn test_attachment_path_is_unique_and_safe() {
        let a = attachment_path("../../etc/passwd");
        let b = attachment_path("../../etc/passwd");
        assert_ne!(a, b);
        assert!(a.starts_with("notifications_attachments/"));
        assert!(!a["notifications_attachments/".len()..].contains('/'));
        assert!(attachment_path("").ends_with("_attachment"));
    }

    #[test]
    fn test_registry_reuses_form_instance() {
        let registry = ComposerRegistry::new(
            Arc::new(InMemoryNotificationStore::new()),
            Arc::new(InMemoryObjectStore::new()),
        );
        let admin = UserId::new("admin-1");

        let broadcast = registry.composer_for(&admin, ComposeMode::Broadcast);
        let again = registry.composer_for(&admin, ComposeMode::Broadcast);
        let private = registry.composer_for(
            &admin,
            ComposeMode::Private {
                recipient_id: UserId::new("u123"),
            },
        );

        assert!(Arc::ptr_eq(&broadcast, &again));
        assert!(!Arc::ptr_eq(&broadcast, &private));
        assert!(registry.find(&admin, "u123").is_some());
        assert!(registry.find(&UserId::new("admin-2"), "broadcast").is_none());
    }

    #[tokio::test]
    async fn test_registry_releases_finished_composers() {
        let registry = ComposerRegistry::new(
            Arc::new(InMemoryNotificationStore::new()),
            Arc::new(InMemoryObjectStore::new()),
        );
        let admin = UserId::new("admin-1");

        for recipient in ["u1", "u2", "u3"] {
            let composer = registry.composer_for(
                &admin,
                ComposeMode::Private {
                    recipient_id: UserId::new(recipient),
                },
            );
            composer
                .submit(
                    &session(Role::Admin),
                    form("Welcome", "Welcome aboard, glad to have you."),
                    None,
                )
                .await
                .unwrap();
            registry.release(&admin, composer);
        }

        assert!(registry.is_empty());
        assert!(registry.find(&admin, "u1").is_none());
    }

    #[test]
    fn test_registry_keeps_composer_while_shared() {
        let registry = ComposerRegistry::new(
            Arc::new(InMemoryNotificationStore::new()),
            Arc::new(InMemoryObjectStore::new()),
        );
        let admin = UserId::new("admin-1");

        let first = registry.composer_for(&admin, ComposeMode::Broadcast);
        let second = registry.composer_for(&admin, ComposeMode::Broadcast);

        registry.release(&admin, first);
        assert_eq!(registry.len(), 1);
        assert!(registry.find(&admin, "broadcast").is_some());

        registry.release(&admin, second);
        assert!(registry.is_empty());
    }
}
