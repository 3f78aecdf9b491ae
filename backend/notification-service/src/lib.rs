//! NotifyAll notification service.
//!
//! Admins compose broadcast or private notifications, optionally with an
//! attachment; recipients follow a live, merged feed. Identity, storage and
//! attachment bytes sit behind the traits in [`stores`] and
//! [`services::identity`].

pub mod app_state;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod security;
pub mod services;
pub mod stores;
pub mod websocket;

pub use app_state::AppState;
pub use config::Config;
pub use error::{AppError, Result};
