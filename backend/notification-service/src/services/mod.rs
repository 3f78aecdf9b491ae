pub mod composer;
pub mod directory;
pub mod feed;
pub mod identity;
pub mod session;

pub use composer::{ComposeError, ComposeMode, ComposerRegistry, NotificationComposer};
pub use feed::{merge_snapshots, FeedState, NotificationFeed};
pub use identity::{IdentityProvider, LocalIdentityProvider};
pub use session::{AuthSession, SessionState};
