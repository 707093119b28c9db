//! Domain types shared by the backend clients and the synchronizer
//!
//! [`Session`] is the authenticated user context, [`Bookmark`] is a row of
//! the bookmark table as confirmed by the backend, and [`NewBookmark`] is
//! the insert payload built from user input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SmartmarkError};

/// Identity of the signed-in user as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque user identifier; bookmark rows reference it as `user_id`.
    pub id: String,

    /// Primary email address, when the provider shares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// An authenticated session.
///
/// Holds the bearer credentials used for row store and realtime requests
/// together with the user they belong to. `expires_at` is derived from the
/// `expires_in` seconds returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer access token.
    pub access_token: String,

    /// Token type, normally `"bearer"`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token used to renew the access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// UTC expiry of the access token. `None` means non-expiring.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// The signed-in user.
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Identifier of the signed-in user.
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Email shown in the view header; falls back to the user id.
    pub fn display_name(&self) -> &str {
        self.user.email.as_deref().unwrap_or(&self.user.id)
    }

    /// Returns `true` when the access token is expired or expires within
    /// the next 60 seconds.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use smartmark::model::{Session, User};
    ///
    /// let session = Session {
    ///     access_token: "tok".to_string(),
    ///     token_type: "bearer".to_string(),
    ///     refresh_token: None,
    ///     expires_at: Some(Utc::now() + Duration::hours(1)),
    ///     user: User { id: "u1".to_string(), email: None },
    /// };
    /// assert!(!session.is_expired());
    /// ```
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => Utc::now() >= expires_at - chrono::Duration::seconds(60),
        }
    }
}

/// A saved link, as confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Backend-assigned identifier. Numeric keys are normalized to strings.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// Display title.
    pub title: String,

    /// Target URL, stored verbatim.
    pub url: String,

    /// Owner; row-level security on the backend keeps this equal to the
    /// session's user id.
    #[serde(default)]
    pub user_id: String,

    /// Creation time, used for newest-first ordering.
    pub created_at: DateTime<Utc>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Sorts bookmarks newest first. Equal timestamps keep their relative order.
pub fn sort_newest_first(bookmarks: &mut [Bookmark]) {
    bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Insert payload for a new bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    /// Display title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Owner of the new row.
    pub user_id: String,
}

impl NewBookmark {
    /// Builds an insert payload from form input.
    ///
    /// Title and url must be non-empty after trimming; no other URL
    /// validation is performed.
    ///
    /// # Errors
    ///
    /// Returns [`SmartmarkError::InvalidInput`] when either field is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use smartmark::model::NewBookmark;
    ///
    /// assert!(NewBookmark::new("Rust", "https://rust-lang.org", "u1").is_ok());
    /// assert!(NewBookmark::new("  ", "https://rust-lang.org", "u1").is_err());
    /// ```
    pub fn new(title: &str, url: &str, user_id: &str) -> Result<Self> {
        let title = title.trim();
        let url = url.trim();
        if title.is_empty() {
            return Err(SmartmarkError::InvalidInput("title must not be empty".to_string()).into());
        }
        if url.is_empty() {
            return Err(SmartmarkError::InvalidInput("url must not be empty".to_string()).into());
        }
        Ok(Self {
            title: title.to_string(),
            url: url.to_string(),
            user_id: user_id.to_string(),
        })
    }
}
