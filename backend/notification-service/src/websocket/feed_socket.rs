//! Live dashboard socket.
//!
//! The socket follows the session behind its token: it streams the merged
//! feed while the gate allows, re-subscribes when the viewer changes, and
//! closes with a `redirect` message once the session ends.

use actix::prelude::*;
use actix_web_actors::ws;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::messages::FeedMessage;
use crate::middleware::guards::{evaluate, GateDecision, RequiredRole};
use crate::services::feed::{FeedState, NotificationFeed};
use crate::services::identity::IdentityProvider;
use crate::services::session::AuthSession;
use crate::stores::{NotificationStore, ProfileStore};

/// Collaborators the socket needs, cloned out of the application state
#[derive(Clone)]
pub struct FeedDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

async fn next_feed_state(rx: &mut Option<watch::Receiver<FeedState>>) -> Option<FeedState> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Drive one live dashboard until the session is gone or `out` closes.
pub async fn run_live_feed(deps: FeedDeps, token: String, out: mpsc::UnboundedSender<FeedMessage>) {
    let events = deps.identity.on_state_change(&token).await;
    let session = AuthSession::start(events, deps.profiles.clone());
    let mut session_rx = session.subscribe();

    let mut feed: Option<NotificationFeed> = None;
    let mut feed_rx: Option<watch::Receiver<FeedState>> = None;
    let mut last_error: Option<String> = None;

    loop {
        let state = session_rx.borrow_and_update().clone();
        let outgoing = match (
            evaluate(&state, RequiredRole::Authenticated),
            state.user_id().cloned(),
        ) {
            (GateDecision::Wait, _) => {
                feed = None;
                feed_rx = None;
                Some(FeedMessage::Loading)
            }
            (GateDecision::RedirectTo(to), _) => {
                let _ = out.send(FeedMessage::redirect(to));
                return;
            }
            (GateDecision::Allow, Some(user_id)) => {
                let current = feed.as_ref().map(|f| f.user_id() == &user_id).unwrap_or(false);
                if current {
                    None
                } else {
                    feed = None;
                    feed_rx = None;
                    last_error = None;
                    debug!(user_id = %user_id, "Subscribing live feed");
                    match NotificationFeed::subscribe(deps.notifications.clone(), user_id).await {
                        Ok(subscribed) => {
                            feed_rx = Some(subscribed.subscribe_state());
                            feed = Some(subscribed);
                            Some(FeedMessage::Loading)
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to open live feed");
                            Some(FeedMessage::Error {
                                message: e.to_string(),
                            })
                        }
                    }
                }
            }
            // Allow on an authenticated route always carries an identity.
            (GateDecision::Allow, None) => None,
        };
        if let Some(message) = outgoing {
            if out.send(message).is_err() {
                return;
            }
        }

        tokio::select! {
            changed = session_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            update = next_feed_state(&mut feed_rx) => match update {
                Some(feed_state) => {
                    if let Some(error) = feed_state.last_error.clone() {
                        if last_error.as_ref() != Some(&error) {
                            last_error = Some(error.clone());
                            if out.send(FeedMessage::Error { message: error }).is_err() {
                                return;
                            }
                        }
                    }
                    let message = if feed_state.loading {
                        FeedMessage::Loading
                    } else {
                        FeedMessage::Snapshot {
                            notifications: feed_state.notifications,
                        }
                    };
                    if out.send(message).is_err() {
                        return;
                    }
                }
                None => feed_rx = None,
            },
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Push(FeedMessage);

/// WebSocket actor bridging [`run_live_feed`] to the client
pub struct FeedSocket {
    deps: FeedDeps,
    token: String,
    tasks: Vec<JoinHandle<()>>,
}

impl FeedSocket {
    pub fn new(deps: FeedDeps, token: String) -> Self {
        Self {
            deps,
            token,
            tasks: Vec::new(),
        }
    }
}

impl Actor for FeedSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Live feed socket opened");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = actix::spawn(run_live_feed(self.deps.clone(), self.token.clone(), tx));

        let addr = ctx.address();
        let forwarder = actix::spawn(async move {
            while let Some(message) = rx.recv().await {
                addr.do_send(Push(message));
            }
        });

        self.tasks.push(driver);
        self.tasks.push(forwarder);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Live feed socket closed");
    }
}

impl Handler<Push> for FeedSocket {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        let message = msg.0;
        match message.to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize feed message: {}", e),
        }

        if message.is_redirect() {
            ctx.close(Some(ws::CloseCode::Normal.into()));
            ctx.stop();
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for FeedSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                // One-way stream
                debug!("Ignoring client message on live feed");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Live feed protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Audience, NewNotification, Role, UserId, UserProfile};
    use crate::security::JwtKeys;
    use crate::services::identity::LocalIdentityProvider;
    use crate::stores::memory::{
        InMemoryAccountStore, InMemoryNotificationStore, InMemoryProfileStore,
    };
    use chrono::Utc;

    fn deps() -> (FeedDeps, Arc<InMemoryNotificationStore>) {
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let deps = FeedDeps {
            identity: Arc::new(LocalIdentityProvider::new(
                Arc::new(InMemoryAccountStore::new()),
                JwtKeys::from_secret(b"test-secret-that-is-at-least-32-bytes-long", 3600),
            )),
            profiles: Arc::new(InMemoryProfileStore::new()),
            notifications: notifications.clone(),
        };
        (deps, notifications)
    }

    async fn next_non_loading(rx: &mut mpsc::UnboundedReceiver<FeedMessage>) -> FeedMessage {
        loop {
            match rx.recv().await.expect("feed closed") {
                FeedMessage::Loading => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_token_redirects_to_login() {
        let (deps, _) = deps();
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_live_feed(deps, "not-a-token".to_string(), tx).await;

        assert_eq!(next_non_loading(&mut rx).await, FeedMessage::redirect("/login"));
    }

    #[tokio::test]
    async fn test_streams_feed_then_redirects_on_sign_out() {
        let (deps, notifications) = deps();
        let signed_in = deps.identity.sign_up("jo@example.com", "secret1").await.unwrap();
        deps.profiles
            .put(UserProfile {
                id: signed_in.identity.user_id.clone(),
                email: "jo@example.com".to_string(),
                display_name: Some("Jo".to_string()),
                role: Role::User,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        notifications
            .insert(NewNotification {
                title: "Maintenance".to_string(),
                message: "System will be down at 10pm tonight for updates.".to_string(),
                sender_id: UserId::new("admin-1"),
                audience: Audience::Broadcast,
                attachment: None,
            })
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run_live_feed(deps.clone(), signed_in.token.clone(), tx));

        loop {
            match next_non_loading(&mut rx).await {
                FeedMessage::Snapshot { notifications }
                    if notifications.iter().any(|n| n.title == "Maintenance") =>
                {
                    break
                }
                FeedMessage::Snapshot { .. } => continue,
                other => panic!("unexpected message: {:?}", other),
            }
        }

        deps.identity.sign_out(&signed_in.token).await.unwrap();
        loop {
            match next_non_loading(&mut rx).await {
                FeedMessage::Snapshot { .. } => continue,
                other => {
                    assert_eq!(other, FeedMessage::redirect("/login"));
                    break;
                }
            }
        }
        driver.await.unwrap();
    }
}
