/// HTTP handlers for the NotifyAll web surface
pub mod admin;
pub mod auth;
pub mod dashboard;
pub mod root;
pub mod settings;

use actix_web::web;
use serde::Serialize;

/// Transient message shown to the user after an action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub variant: &'static str,
    pub title: String,
    pub description: String,
}

impl Toast {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            variant: "default",
            title: title.into(),
            description: description.into(),
        }
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(root::index))
        .route("/login", web::post().to(auth::login))
        .route("/signup", web::post().to(auth::signup))
        .route("/logout", web::post().to(auth::logout))
        .route("/session/refresh", web::post().to(auth::refresh))
        .route("/dashboard", web::get().to(dashboard::feed_snapshot))
        .route("/dashboard/live", web::get().to(dashboard::live_feed))
        .route("/settings", web::get().to(settings::view_settings))
        .service(
            web::scope("/admin")
                .route("", web::get().to(admin::directory))
                .route("", web::post().to(admin::send_broadcast))
                .route("/users/{id}", web::get().to(admin::recipient))
                .route("/users/{id}", web::post().to(admin::send_private))
                .route("/compose/progress", web::get().to(admin::compose_progress)),
        );
}
