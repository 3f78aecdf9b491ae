use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde_json::json;
use tracing::info;

use crate::app_state::AppState;
use crate::error::Result;
use crate::middleware::Authenticated;
use crate::services::feed::current_feed;
use crate::websocket::{FeedDeps, FeedSocket};

/// Merged feed for the viewer: their private notifications plus broadcasts
///
/// GET /dashboard
pub async fn feed_snapshot(
    state: web::Data<AppState>,
    guard: Authenticated,
) -> Result<HttpResponse> {
    let Some(user_id) = guard.session.user_id() else {
        return Ok(HttpResponse::Ok().json(json!({ "notifications": [] })));
    };

    let notifications = current_feed(state.notifications.as_ref(), user_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "user": guard.session.identity,
        "role": guard.session.role,
        "notifications": notifications,
    })))
}

/// Live feed over WebSocket
///
/// GET /dashboard/live
pub async fn live_feed(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
    guard: Authenticated,
) -> actix_web::Result<HttpResponse> {
    info!(user_id = ?guard.session.user_id(), "Live feed connection");

    let deps = FeedDeps {
        identity: state.identity.clone(),
        profiles: state.profiles.clone(),
        notifications: state.notifications.clone(),
    };
    ws::start(FeedSocket::new(deps, guard.token), &req, payload)
}
