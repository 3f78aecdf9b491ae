//! Authorization gate enforced at the type level.
//!
//! A handler that takes [`Authenticated`] or [`AdminOnly`] never runs unless
//! the gate allows the viewer through.

use actix_web::{dev::Payload, http::header, web, Error, FromRequest, HttpRequest};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use tracing::debug;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::services::session::{AuthSession, SessionState};

pub const SESSION_COOKIE: &str = "notifyall_session";

pub const LOGIN_PATH: &str = "/login";
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const ADMIN_PATH: &str = "/admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredRole {
    None,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Session still resolving; render nothing and do not redirect
    Wait,
    Allow,
    RedirectTo(&'static str),
}

pub fn evaluate(session: &SessionState, required: RequiredRole) -> GateDecision {
    if session.loading {
        return GateDecision::Wait;
    }

    match required {
        RequiredRole::None => GateDecision::Allow,
        _ if session.identity.is_none() => GateDecision::RedirectTo(LOGIN_PATH),
        RequiredRole::Admin if !session.is_admin() => GateDecision::RedirectTo(DASHBOARD_PATH),
        _ => GateDecision::Allow,
    }
}

/// Session token from `Authorization: Bearer` or the session cookie.
pub fn session_token(req: &HttpRequest) -> Option<String> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    bearer.or_else(|| {
        req.cookie(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Resolve the request's session in one shot.
pub async fn resolve_session(state: &AppState, token: Option<&str>) -> Result<SessionState, AppError> {
    let identity = match token {
        Some(token) => state.identity.current(token).await?,
        None => None,
    };
    Ok(AuthSession::resolve(identity, state.profiles.as_ref()).await)
}

pub trait Requirement {
    const ROLE: RequiredRole;
}

pub struct AuthenticatedRoute;

impl Requirement for AuthenticatedRoute {
    const ROLE: RequiredRole = RequiredRole::Authenticated;
}

pub struct AdminRoute;

impl Requirement for AdminRoute {
    const ROLE: RequiredRole = RequiredRole::Admin;
}

/// Settled session that passed the gate for `R`
pub struct Guard<R: Requirement> {
    pub session: SessionState,
    pub token: String,
    _requirement: PhantomData<R>,
}

pub type Authenticated = Guard<AuthenticatedRoute>;
pub type AdminOnly = Guard<AdminRoute>;

impl<R: Requirement> FromRequest for Guard<R> {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = session_token(req);
        let path = req.path().to_string();

        Box::pin(async move {
            let state = state.ok_or_else(|| AppError::Internal("application state missing".into()))?;
            let session = resolve_session(&state, token.as_deref()).await?;

            match evaluate(&session, R::ROLE) {
                GateDecision::Allow => Ok(Guard {
                    session,
                    // Allow implies an identity, which implies a token.
                    token: token.unwrap_or_default(),
                    _requirement: PhantomData,
                }),
                GateDecision::RedirectTo(to) => {
                    debug!(path = %path, to, "Gate redirect");
                    Err(AppError::Redirect(to.to_string()).into())
                }
                GateDecision::Wait => Err(AppError::SessionLoading.into()),
            }
        })
    }
}
