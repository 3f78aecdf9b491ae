use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::Toast;
use crate::app_state::AppState;
use crate::error::{AppError, Result};
use crate::middleware::guards::ADMIN_PATH;
use crate::middleware::AdminOnly;
use crate::models::{UserId, UserProfile};
use crate::services::composer::{AttachmentUpload, ComposeMode, NotificationForm};
use crate::services::directory::{list_directory, load_recipient, DirectoryEntry};
use crate::stores::StoreError;

/// Attachment size guardrail
pub const MAX_ATTACHMENT_BYTES: usize = 20 * 1024 * 1024;

/// Text fields are small; anything larger is a malformed request.
const MAX_TEXT_FIELD_BYTES: usize = 16 * 1024;

/// Parsed compose submission
pub struct ComposeSubmission {
    pub form: NotificationForm,
    pub attachment: Option<AttachmentUpload>,
}

async fn read_field(
    field: &mut actix_multipart::Field,
    limit: usize,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::BadRequest(format!(
                "Field exceeds the {} byte limit",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn text(bytes: Vec<u8>, name: &str) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| AppError::BadRequest(format!("{} must be UTF-8 text", name)))
}

/// Read `title`, `message` and an optional `file` from a multipart body.
pub async fn parse_submission(mut payload: Multipart) -> Result<ComposeSubmission> {
    let mut title = String::new();
    let mut message = String::new();
    let mut attachment = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?;
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "title" => title = text(read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?, "title")?,
            "message" => {
                message = text(read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?, "message")?
            }
            "file" => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or_default()
                    .to_string();
                let content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_default();
                let bytes = read_field(&mut field, MAX_ATTACHMENT_BYTES).await?;

                // An empty file input means no attachment.
                if !file_name.is_empty() && !bytes.is_empty() {
                    attachment = Some(AttachmentUpload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
            }
            other => {
                debug!(field = other, "Skipping unknown multipart field");
                read_field(&mut field, MAX_ATTACHMENT_BYTES).await?;
            }
        }
    }

    Ok(ComposeSubmission {
        form: NotificationForm { title, message },
        attachment,
    })
}

async fn compose(
    state: &AppState,
    guard: &AdminOnly,
    mode: ComposeMode,
    payload: Multipart,
) -> Result<HttpResponse> {
    let admin = guard
        .session
        .user_id()
        .ok_or_else(|| AppError::Internal("admin session without identity".to_string()))?;
    let submission = parse_submission(payload).await?;

    let composer = state.composers.composer_for(admin, mode);
    let label = composer.mode().label();
    let result = composer
        .submit(&guard.session, submission.form, submission.attachment)
        .await;
    state.composers.release(admin, composer);
    let notification = result?;

    info!(notification_id = %notification.id, audience = label, "Compose succeeded");
    Ok(HttpResponse::Created().json(json!({
        "notification": notification,
        "toast": Toast::success(
            "Notification Sent!",
            format!("Your {} notification has been successfully sent.", label),
        ),
    })))
}

async fn recipient_or_back(state: &AppState, id: &UserId) -> Result<UserProfile> {
    match load_recipient(state.profiles.as_ref(), id).await {
        Ok(profile) => Ok(profile),
        Err(StoreError::NotFound(_)) => {
            debug!(recipient_id = %id, "Recipient missing, back to directory");
            Err(AppError::Redirect(ADMIN_PATH.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// User directory plus the broadcast composer
///
/// GET /admin
pub async fn directory(state: web::Data<AppState>, guard: AdminOnly) -> Result<HttpResponse> {
    let users = list_directory(state.profiles.as_ref()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "viewer": guard.session.identity,
        "compose_mode": "broadcast",
        "users": users,
    })))
}

/// Send a broadcast notification
///
/// POST /admin
pub async fn send_broadcast(
    state: web::Data<AppState>,
    guard: AdminOnly,
    payload: Multipart,
) -> Result<HttpResponse> {
    compose(&state, &guard, ComposeMode::Broadcast, payload).await
}

/// Recipient details for the private composer
///
/// GET /admin/users/{id}
pub async fn recipient(
    state: web::Data<AppState>,
    _guard: AdminOnly,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let id = UserId(path.into_inner());
    let profile = recipient_or_back(&state, &id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "compose_mode": "private",
        "recipient": DirectoryEntry::from(profile),
    })))
}

/// Send a private notification to `{id}`
///
/// POST /admin/users/{id}
pub async fn send_private(
    state: web::Data<AppState>,
    guard: AdminOnly,
    path: web::Path<String>,
    payload: Multipart,
) -> Result<HttpResponse> {
    let id = UserId(path.into_inner());
    let profile = recipient_or_back(&state, &id).await?;
    compose(
        &state,
        &guard,
        ComposeMode::Private {
            recipient_id: profile.id,
        },
        payload,
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    #[serde(default = "broadcast_form")]
    pub form: String,
}

fn broadcast_form() -> String {
    ComposeMode::Broadcast.form_key()
}

/// Upload progress of one compose form
///
/// GET /admin/compose/progress?form=broadcast|{user id}
pub async fn compose_progress(
    state: web::Data<AppState>,
    guard: AdminOnly,
    query: web::Query<ProgressQuery>,
) -> Result<HttpResponse> {
    let form = query.into_inner().form;
    let composer = guard
        .session
        .user_id()
        .and_then(|admin| state.composers.find(admin, &form));

    let (progress, submitting) = match composer {
        Some(composer) => (composer.current_progress(), composer.is_submitting()),
        None => (None, false),
    };

    Ok(HttpResponse::Ok().json(json!({
        "form": form,
        "progress": progress,
        "submitting": submitting,
    })))
}
