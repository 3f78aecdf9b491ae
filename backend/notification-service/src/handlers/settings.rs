use actix_web::HttpResponse;
use serde::Serialize;

use crate::error::Result;
use crate::middleware::Authenticated;
use crate::models::Role;
use crate::services::session::SessionState;

pub const MISSING_VALUE: &str = "N/A";

#[derive(Debug, Serialize, PartialEq)]
pub struct SettingsView {
    pub display_name: String,
    pub email: String,
    pub role: Role,
}

impl From<&SessionState> for SettingsView {
    fn from(session: &SessionState) -> Self {
        let profile = session.profile.as_ref();
        let identity = session.identity.as_ref();

        let display_name = profile
            .and_then(|p| p.display_name.clone())
            .or_else(|| identity.and_then(|i| i.display_name.clone()))
            .unwrap_or_else(|| MISSING_VALUE.to_string());
        let email = profile
            .map(|p| p.email.clone())
            .or_else(|| identity.map(|i| i.email.clone()))
            .unwrap_or_else(|| MISSING_VALUE.to_string());
        let role = profile
            .map(|p| p.role)
            .or(session.role)
            .unwrap_or_default();

        SettingsView {
            display_name,
            email,
            role,
        }
    }
}

/// Read-only account settings
///
/// GET /settings
pub async fn view_settings(guard: Authenticated) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(SettingsView::from(&guard.session)))
}
