//! Notification feed: private and broadcast live queries merged into one view.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics;
use crate::models::{Notification, UserId};
use crate::stores::{NotificationFilter, NotificationStore, StoreResult};

/// Merge the two latest snapshots, newest first, one entry per id.
pub fn merge_snapshots(private: &[Notification], broadcast: &[Notification]) -> Vec<Notification> {
    let mut merged: Vec<Notification> = private.iter().chain(broadcast).cloned().collect();
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut seen = HashSet::new();
    merged.retain(|n| seen.insert(n.id.clone()));
    merged
}

/// One merged snapshot of both sources, without subscribing to either.
pub async fn current_feed(
    store: &dyn NotificationStore,
    user_id: &UserId,
) -> StoreResult<Vec<Notification>> {
    let (private, broadcast) = tokio::try_join!(
        store.snapshot(NotificationFilter::Recipient(user_id.clone())),
        store.snapshot(NotificationFilter::Broadcast),
    )?;

    Ok(merge_snapshots(&private, &broadcast))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedState {
    pub loading: bool,
    pub notifications: Vec<Notification>,
    pub last_error: Option<String>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            loading: true,
            notifications: Vec::new(),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Private,
    Broadcast,
}

impl Source {
    fn label(self) -> &'static str {
        match self {
            Source::Private => "private",
            Source::Broadcast => "broadcast",
        }
    }
}

/// Latest good snapshot per source.
#[derive(Default)]
struct Sources {
    private: Vec<Notification>,
    broadcast: Vec<Notification>,
}

impl Sources {
    fn apply(
        &mut self,
        tx: &watch::Sender<FeedState>,
        source: Source,
        result: StoreResult<Vec<Notification>>,
    ) {
        let error = match result {
            Ok(snapshot) => {
                match source {
                    Source::Private => self.private = snapshot,
                    Source::Broadcast => self.broadcast = snapshot,
                }
                None
            }
            Err(e) => {
                warn!(source = source.label(), error = %e, "Live query failed, keeping last snapshot");
                Some(e.to_string())
            }
        };

        let notifications = merge_snapshots(&self.private, &self.broadcast);
        tx.send_modify(|state| {
            state.loading = false;
            state.notifications = notifications;
            if error.is_some() {
                state.last_error = error;
            }
        });
    }
}

/// Live view of one user's notifications. Dropping it tears down both
/// queries.
pub struct NotificationFeed {
    user_id: UserId,
    state: watch::Receiver<FeedState>,
    task: JoinHandle<()>,
}

impl NotificationFeed {
    pub async fn subscribe(
        store: Arc<dyn NotificationStore>,
        user_id: UserId,
    ) -> StoreResult<Self> {
        let mut private = store
            .live_query(NotificationFilter::Recipient(user_id.clone()))
            .await?;
        let mut broadcast = store.live_query(NotificationFilter::Broadcast).await?;

        let (tx, rx) = watch::channel(FeedState::default());
        let feed_user = user_id.clone();

        let task = tokio::spawn(async move {
            let _gauge = metrics::LiveFeedGuard::open();
            let mut sources = Sources::default();
            let mut private_open = true;
            let mut broadcast_open = true;

            while private_open || broadcast_open {
                tokio::select! {
                    update = private.next_snapshot(), if private_open => match update {
                        Some(result) => sources.apply(&tx, Source::Private, result),
                        None => private_open = false,
                    },
                    update = broadcast.next_snapshot(), if broadcast_open => match update {
                        Some(result) => sources.apply(&tx, Source::Broadcast, result),
                        None => broadcast_open = false,
                    },
                }
            }
            debug!(user_id = %feed_user, "Feed sources closed");
        });

        Ok(Self {
            user_id,
            state: rx,
            task,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Wait until either source has delivered.
    pub async fn ready(&self) -> FeedState {
        let mut rx = self.state.clone();
        let ready = rx.wait_for(|state| !state.loading).await.map(|s| s.clone());
        ready.unwrap_or_else(|_| rx.borrow().clone())
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}
