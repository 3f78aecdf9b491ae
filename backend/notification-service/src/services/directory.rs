//! User directory for the admin dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Role, UserId, UserProfile};
use crate::stores::{ProfileStore, StoreError, StoreResult};

pub const MISSING_DISPLAY_NAME: &str = "N/A";

/// One row of the directory table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryEntry {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub initials: String,
    pub joined: DateTime<Utc>,
    pub compose_url: String,
}

impl From<UserProfile> for DirectoryEntry {
    fn from(profile: UserProfile) -> Self {
        let initials = initials(profile.display_name.as_deref());
        let display_name = match profile.display_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => MISSING_DISPLAY_NAME.to_string(),
        };

        DirectoryEntry {
            compose_url: compose_url(&profile.id),
            id: profile.id,
            display_name,
            email: profile.email,
            role: profile.role,
            initials,
            joined: profile.created_at,
        }
    }
}

pub fn compose_url(id: &UserId) -> String {
    format!("/admin/users/{}", id)
}

/// Avatar fallback: first letter of each word, uppercased; `U` when absent.
pub fn initials(display_name: Option<&str>) -> String {
    let letters: String = display_name
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect();

    if letters.is_empty() {
        "U".to_string()
    } else {
        letters
    }
}

/// All profiles, newest first.
pub async fn list_directory(profiles: &dyn ProfileStore) -> StoreResult<Vec<DirectoryEntry>> {
    let mut all = profiles.list_all().await?;
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(all.into_iter().map(DirectoryEntry::from).collect())
}

/// Recipient for the private composer.
pub async fn load_recipient(profiles: &dyn ProfileStore, id: &UserId) -> StoreResult<UserProfile> {
    profiles
        .get(id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::InMemoryProfileStore;
    use chrono::Duration;

    fn profile(id: &str, name: Option<&str>, age_days: i64) -> UserProfile {
        UserProfile {
            id: UserId::new(id),
            email: format!("{}@example.com", id),
            display_name: name.map(str::to_string),
            role: Role::User,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials(Some("Ada Lovelace")), "AL");
        assert_eq!(initials(Some("jo")), "J");
        assert_eq!(initials(Some("  grace   brewster hopper ")), "GBH");
        assert_eq!(initials(Some("")), "U");
        assert_eq!(initials(None), "U");
    }

    #[test]
    fn test_entry_fallbacks() {
        let entry = DirectoryEntry::from(profile("u1", None, 0));
        assert_eq!(entry.display_name, "N/A");
        assert_eq!(entry.initials, "U");
        assert_eq!(entry.compose_url, "/admin/users/u1");
    }

    #[tokio::test]
    async fn test_directory_is_newest_first() {
        let store = InMemoryProfileStore::new();
        store.put(profile("old", Some("Old"), 10)).await.unwrap();
        store.put(profile("new", Some("New"), 1)).await.unwrap();
        store.put(profile("mid", Some("Mid"), 5)).await.unwrap();

        let ids: Vec<String> = list_directory(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id.0)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_missing_recipient_is_not_found() {
        let store = InMemoryProfileStore::new();
        store.put(profile("u123", Some("Jo"), 0)).await.unwrap();

        assert_eq!(
            load_recipient(&store, &UserId::new("u123")).await.unwrap().email,
            "u123@example.com"
        );
        assert!(matches!(
            load_recipient(&store, &UserId::new("ghost")).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
