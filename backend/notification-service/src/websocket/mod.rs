/// Live dashboard over WebSocket
///
/// `feed_socket` follows one session and streams its merged feed;
/// `messages` is the wire format.
pub mod feed_socket;
pub mod messages;

pub use feed_socket::{FeedDeps, FeedSocket};
pub use messages::FeedMessage;
