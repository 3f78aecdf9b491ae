//! Messages pushed to the live dashboard socket
use serde::{Deserialize, Serialize};

use crate::models::Notification;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Session or feed still resolving; render nothing yet
    Loading,

    /// Full merged feed, newest first
    Snapshot { notifications: Vec<Notification> },

    /// The viewer may no longer see this page
    Redirect { to: String },

    /// A feed source failed; the last snapshot stays valid
    Error { message: String },
}

impl FeedMessage {
    pub fn redirect(to: &str) -> Self {
        FeedMessage::Redirect { to: to.to_string() }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, FeedMessage::Redirect { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        assert_eq!(FeedMessage::Loading.to_json().unwrap(), r#"{"type":"loading"}"#);
        assert_eq!(
            FeedMessage::redirect("/login").to_json().unwrap(),
            r#"{"type":"redirect","to":"/login"}"#
        );

        let snapshot: serde_json::Value = serde_json::from_str(
            &FeedMessage::Snapshot {
                notifications: vec![],
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot["type"], "snapshot");
        assert!(snapshot["notifications"].as_array().unwrap().is_empty());
    }
}
