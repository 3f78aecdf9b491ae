use actix_web::{
    error::ResponseError,
    http::{header, StatusCode},
    HttpResponse,
};
use error_types::{error_codes, error_types as kinds, ErrorResponse, FieldErrors};
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

use crate::services::composer::ComposeError;
use crate::services::identity::AuthError;
use crate::stores::StoreError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Upload(String),

    #[error("{0}")]
    Transport(String),

    /// Navigation outcome rendered as `303 See Other`
    #[error("Redirecting to {0}")]
    Redirect(String),

    #[error("Session is still loading")]
    SessionLoading,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn labels(&self) -> (&'static str, &'static str) {
        match self {
            AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
            AppError::Validation(_) => (kinds::VALIDATION_ERROR, error_codes::VALIDATION_FAILED),
            AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::BAD_REQUEST),
            AppError::Authentication(_) => {
                (kinds::AUTHENTICATION_ERROR, error_codes::INVALID_CREDENTIALS)
            }
            AppError::Authorization(_) => (kinds::AUTHORIZATION_ERROR, error_codes::ADMIN_REQUIRED),
            AppError::NotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::NOT_FOUND),
            AppError::Conflict(_) => (kinds::CONFLICT_ERROR, error_codes::SUBMISSION_IN_PROGRESS),
            AppError::Upload(_) => (kinds::UPLOAD_ERROR, error_codes::ATTACHMENT_UPLOAD_FAILED),
            AppError::Transport(_) => (kinds::SERVER_ERROR, error_codes::STORE_ERROR),
            AppError::Redirect(_) => (kinds::AUTHORIZATION_ERROR, error_codes::SESSION_MISSING),
            AppError::SessionLoading => {
                (kinds::SERVICE_UNAVAILABLE_ERROR, error_codes::SESSION_LOADING)
            }
            AppError::Internal(_) => (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upload(_) => StatusCode::BAD_GATEWAY,
            AppError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Redirect(_) => StatusCode::SEE_OTHER,
            AppError::SessionLoading => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        if let AppError::Redirect(location) = self {
            return HttpResponse::build(status)
                .insert_header((header::LOCATION, location.as_str()))
                .finish();
        }

        let (error_type, code) = self.labels();
        let mut body = ErrorResponse::new(
            status.canonical_reason().unwrap_or("Error"),
            &self.to_string(),
            status.as_u16(),
            error_type,
            code,
        );
        if let AppError::Validation(fields) = self {
            body = body.with_fields(fields.clone());
        }
        if let AppError::Database(e) = self {
            body = body.with_details(e.to_string());
        }

        let mut response = HttpResponse::build(status);
        if matches!(self, AppError::SessionLoading) {
            response.insert_header((header::RETRY_AFTER, "1"));
        }
        response.json(body)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(what) => AppError::Conflict(what),
            StoreError::Backend(message) => AppError::Transport(message),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::InvalidToken => {
                AppError::Authentication(err.to_string())
            }
            AuthError::EmailInUse => AppError::Conflict(err.to_string()),
            AuthError::Store(e) => e.into(),
            AuthError::Internal(message) => AppError::Internal(message),
        }
    }
}

impl From<ComposeError> for AppError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Validation(fields) => AppError::Validation(fields),
            ComposeError::Unauthorized => AppError::Authorization(err.to_string()),
            ComposeError::Busy => AppError::Conflict(err.to_string()),
            ComposeError::Upload(e) => AppError::Upload(e.to_string()),
            ComposeError::Transport(message) => AppError::Transport(message),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(field_errors(&errors))
    }
}

/// Flatten validator output into field -> messages.
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs.iter().map(|e| describe(&field, e)).collect();
            (field.to_string(), messages)
        })
        .collect()
}

fn describe(field: &str, error: &ValidationError) -> String {
    if let Some(message) = &error.message {
        return message.to_string();
    }

    let label = field_label(field);
    let param = |name: &str| error.params.get(name).and_then(|v| v.as_u64());

    match &*error.code {
        "length" => {
            let actual = error
                .params
                .get("value")
                .and_then(|v| v.as_str())
                .map(|s| s.chars().count() as u64)
                .unwrap_or(0);
            match (param("min"), param("max")) {
                (Some(min), _) if actual < min => {
                    format!("{} must be at least {} characters.", label, min)
                }
                (_, Some(max)) => format!("{} must be at most {} characters.", label, max),
                _ => format!("{} has an invalid length.", label),
            }
        }
        "email" => "Invalid email address.".to_string(),
        _ => format!("{} is invalid.", label),
    }
}

fn field_label(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
