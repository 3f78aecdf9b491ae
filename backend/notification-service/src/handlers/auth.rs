use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use super::Toast;
use crate::app_state::AppState;
use crate::error::{AppError, Result};
use crate::middleware::guards::{session_token, DASHBOARD_PATH, LOGIN_PATH, SESSION_COOKIE};
use crate::models::{Role, UserProfile};
use crate::services::identity::{Identity, SignedIn};
use crate::stores::normalize_email;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 2, message = "Display name must be at least 2 characters."))]
    pub display_name: String,
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_in: i64,
    pub redirect_to: &'static str,
    pub user: Identity,
}

fn session_cookie(state: &AppState, signed_in: &SignedIn) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, signed_in.token.clone())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.secure_cookies)
        .max_age(CookieDuration::seconds(signed_in.expires_in))
        .finish()
}

fn session_response(state: &AppState, signed_in: SignedIn) -> HttpResponse {
    let cookie = session_cookie(state, &signed_in);
    HttpResponse::Ok().cookie(cookie).json(SessionResponse {
        token: signed_in.token,
        expires_in: signed_in.expires_in,
        redirect_to: DASHBOARD_PATH,
        user: signed_in.identity,
    })
}

/// Sign in with email and password
///
/// POST /login
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    body.validate()?;

    let signed_in = state
        .identity
        .sign_in(&normalize_email(&body.email), &body.password)
        .await?;

    Ok(session_response(&state, signed_in))
}

/// Create an account, set its display name and write its profile
///
/// POST /signup
pub async fn signup(
    state: web::Data<AppState>,
    body: web::Json<SignupRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    body.validate()?;

    let email = normalize_email(&body.email);
    let signed_in = state.identity.sign_up(&email, &body.password).await?;
    let identity = state
        .identity
        .update_display_name(&signed_in.identity, &body.display_name)
        .await?;

    let role = match &state.bootstrap_admin_email {
        Some(admin) if normalize_email(admin) == email => Role::Admin,
        _ => Role::User,
    };
    state
        .profiles
        .put(UserProfile {
            id: identity.user_id.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            role,
            created_at: Utc::now(),
        })
        .await?;

    // The user logs in explicitly afterwards.
    if let Err(e) = state.identity.sign_out(&signed_in.token).await {
        warn!(user_id = %identity.user_id, error = %e, "Failed to close signup session");
    }

    info!(user_id = %identity.user_id, role = role.as_str(), "User signed up");
    Ok(HttpResponse::SeeOther()
        .insert_header((header::LOCATION, LOGIN_PATH))
        .json(json!({
            "user": identity,
            "toast": Toast::success(
                "Signup Successful",
                "Your account has been created. Please login.",
            ),
        })))
}

/// Revoke the current session
///
/// POST /logout
pub async fn logout(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    if let Some(token) = session_token(&req) {
        state.identity.sign_out(&token).await?;
    }

    let mut removal = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    removal.make_removal();

    Ok(HttpResponse::SeeOther()
        .insert_header((header::LOCATION, LOGIN_PATH))
        .cookie(removal)
        .finish())
}

/// Re-issue the session token; live feeds on this session re-resolve
///
/// POST /session/refresh
pub async fn refresh(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let token = session_token(&req)
        .ok_or_else(|| AppError::Authentication("Session token missing".to_string()))?;
    let signed_in = state.identity.refresh(&token).await?;
    Ok(session_response(&state, signed_in))
}
