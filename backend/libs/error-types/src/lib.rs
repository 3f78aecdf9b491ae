//! Shared JSON error body for NotifyAll HTTP services.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name -> human readable messages, in field order.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Uniform API error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short error label, e.g. "Bad Request"
    pub error: String,

    /// User facing message
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error category used by clients for routing, see [`error_types`]
    pub error_type: String,

    /// Stable machine readable code, see [`error_codes`]
    pub code: String,

    /// Per-field validation messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,

    /// Underlying cause, only set outside production
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            fields: None,
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_fields(mut self, fields: FieldErrors) -> Self {
        if !fields.is_empty() {
            self.fields = Some(fields);
        }
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

/// Stable error codes
pub mod error_codes {
    // Accounts and sessions
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const EMAIL_ALREADY_IN_USE: &str = "EMAIL_ALREADY_IN_USE";
    pub const SESSION_MISSING: &str = "SESSION_MISSING";
    pub const SESSION_INVALID: &str = "SESSION_INVALID";
    pub const SESSION_LOADING: &str = "SESSION_LOADING";

    // Authorization
    pub const ADMIN_REQUIRED: &str = "ADMIN_REQUIRED";

    // Input
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";

    // Notifications
    pub const RECIPIENT_NOT_FOUND: &str = "RECIPIENT_NOT_FOUND";
    pub const SUBMISSION_IN_PROGRESS: &str = "SUBMISSION_IN_PROGRESS";
    pub const ATTACHMENT_UPLOAD_FAILED: &str = "ATTACHMENT_UPLOAD_FAILED";
    pub const NOT_FOUND: &str = "NOT_FOUND";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const STORE_ERROR: &str = "STORE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
    pub const UPLOAD_ERROR: &str = "upload_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}
