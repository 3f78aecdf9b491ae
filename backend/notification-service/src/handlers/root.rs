use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::app_state::AppState;
use crate::error::Result;
use crate::middleware::guards::{session_token, DASHBOARD_PATH, LOGIN_PATH};

/// Send the viewer to their dashboard, or to login
///
/// GET /
pub async fn index(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let signed_in = match session_token(&req) {
        Some(token) => state.identity.current(&token).await?.is_some(),
        None => false,
    };

    let to = if signed_in { DASHBOARD_PATH } else { LOGIN_PATH };
    Ok(HttpResponse::SeeOther()
        .insert_header((header::LOCATION, to))
        .finish())
}
