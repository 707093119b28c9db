//! Backend collaborator contract
//!
//! The hosted service is reached through three narrow traits:
//!
//! - [`AuthProvider`] -- current session, session-change subscription,
//!   federated sign-in and sign-out.
//! - [`BookmarkStore`] -- select-all with ordering, insert returning the
//!   confirmed row, delete by id.
//! - [`ChangeFeed`] -- table change notifications.
//!
//! Concrete implementations live in submodules:
//!
//! - [`auth::HttpAuth`] and [`rest::RestStore`] talk to a
//!   Supabase-compatible project over HTTP;
//!   [`realtime::PhoenixChangeFeed`] joins its realtime websocket, and
//!   [`realtime::SseChangeFeed`] reads an event-stream relay instead.
//! - [`fake::FakeBackend`] keeps everything in memory for tests.
//!
//! Both subscription kinds are guards: dropping a [`SessionSubscription`]
//! or a [`ChangeSubscription`] releases it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, SmartmarkError};
use crate::model::{Bookmark, NewBookmark, Session};

pub mod auth;
pub mod fake;
pub mod realtime;
pub mod rest;

// ---------------------------------------------------------------------------
// Session cell
// ---------------------------------------------------------------------------

/// Shared holder of the current session.
///
/// The auth client publishes into it; the row store and the change feed
/// read the bearer token from it; views subscribe to it for session-change
/// notifications.
pub type SessionCell = Arc<watch::Sender<Option<Session>>>;

/// Creates an empty [`SessionCell`].
pub fn session_cell() -> SessionCell {
    let (tx, _rx) = watch::channel(None);
    Arc::new(tx)
}

/// Bearer credential for a request: the session's access token when signed
/// in, otherwise the project's anonymous key.
pub(crate) fn bearer_token(cell: &SessionCell, anon_key: &str) -> String {
    cell.borrow()
        .as_ref()
        .map(|s| s.access_token.clone())
        .unwrap_or_else(|| anon_key.to_string())
}

/// Maps a non-success response into a typed error.
pub(crate) async fn error_for_status(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return SmartmarkError::Authentication(format!("backend returned {status}: {body}")).into();
    }
    SmartmarkError::Backend {
        status: status.as_u16(),
        message: body,
    }
    .into()
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// Kind of row change reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was inserted
    Insert,
    /// A row was updated
    Update,
    /// A row was deleted
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Which change kinds a subscription is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Every insert, update and delete (`*`)
    #[default]
    All,
    /// A single change kind
    Only(ChangeKind),
}

impl EventFilter {
    /// Returns `true` when `kind` passes the filter.
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(k) => *k == kind,
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFilter::All => write!(f, "*"),
            EventFilter::Only(kind) => write!(f, "{kind}"),
        }
    }
}

impl FromStr for EventFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "*" | "ALL" => Ok(EventFilter::All),
            "INSERT" => Ok(EventFilter::Only(ChangeKind::Insert)),
            "UPDATE" => Ok(EventFilter::Only(ChangeKind::Update)),
            "DELETE" => Ok(EventFilter::Only(ChangeKind::Delete)),
            other => Err(SmartmarkError::Config(format!(
                "unknown realtime event filter '{other}' (expected *, INSERT, UPDATE or DELETE)"
            ))
            .into()),
        }
    }
}

/// A single change notification for a table.
///
/// Only `kind` and `table` drive behavior; the row images are kept for
/// logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Insert, update or delete
    #[serde(rename = "type", alias = "eventType")]
    pub kind: ChangeKind,

    /// Database schema, normally `public`
    #[serde(default)]
    pub schema: String,

    /// Table the change applies to
    pub table: String,

    /// New row image (insert/update)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,

    /// Previous row image (update/delete)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<serde_json::Value>,

    /// Commit time reported by the database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Builds an event with no row images.
    pub fn new(kind: ChangeKind, table: &str) -> Self {
        Self {
            kind,
            schema: "public".to_string(),
            table: table.to_string(),
            record: None,
            old_record: None,
            commit_timestamp: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription guards
// ---------------------------------------------------------------------------

/// Scoped subscription to session changes.
///
/// Wraps a `watch` receiver; dropping it unsubscribes.
#[derive(Debug)]
pub struct SessionSubscription {
    rx: watch::Receiver<Option<Session>>,
}

impl SessionSubscription {
    /// Subscribes to a session cell. The current value counts as seen.
    pub fn new(cell: &SessionCell) -> Self {
        Self { rx: cell.subscribe() }
    }

    /// Waits for the next session change.
    ///
    /// Returns `None` once the publishing side is gone.
    pub async fn changed(&mut self) -> Option<Option<Session>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Scoped subscription to table changes.
///
/// Dropping the guard cancels the producing task, so no notification is
/// delivered after release and no task outlives the subscription.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    /// Wraps a receiver together with the token and task that feed it.
    pub fn new(
        rx: mpsc::Receiver<ChangeEvent>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { rx, cancel, task }
    }

    /// Waits for the next change event; `None` when the feed has ended.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Returns an already-queued event without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Releases the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Identity side of the backend.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the current session, restoring or refreshing it if needed.
    async fn current_session(&self) -> Result<Option<Session>>;

    /// Subscribes to session changes (sign-in, sign-out, token refresh).
    fn subscribe_sessions(&self) -> SessionSubscription;

    /// Runs the federated sign-in flow for `provider`.
    async fn sign_in(&self, provider: &str) -> Result<Session>;

    /// Ends the current session.
    async fn sign_out(&self) -> Result<()>;
}

/// Sort order for [`BookmarkStore::select_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Column to order by
    pub column: String,
    /// Ascending when `true`
    pub ascending: bool,
}

impl Order {
    /// `created_at` descending.
    pub fn newest_first() -> Self {
        Self {
            column: "created_at".to_string(),
            ascending: false,
        }
    }

    /// PostgREST `order` query value, e.g. `created_at.desc`.
    pub fn to_query(&self) -> String {
        let dir = if self.ascending { "asc" } else { "desc" };
        format!("{}.{}", self.column, dir)
    }
}

/// Row store for bookmarks.
#[async_trait::async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Every row visible to the current session, in `order`.
    async fn select_all(&self, order: &Order) -> Result<Vec<Bookmark>>;

    /// Inserts a row and returns it as stored (id and timestamp assigned).
    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark>;

    /// Deletes the row with `id`.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Source of table change notifications.
#[async_trait::async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribes to changes on `table` that pass `filter`.
    async fn subscribe(&self, table: &str, filter: EventFilter) -> Result<ChangeSubscription>;
}

/// The three collaborator capabilities bundled for injection.
#[derive(Clone)]
pub struct Backend {
    /// Identity service
    pub auth: Arc<dyn AuthProvider>,
    /// Row store
    pub store: Arc<dyn BookmarkStore>,
    /// Change notifications
    pub feed: Arc<dyn ChangeFeed>,
}

impl Backend {
    /// Bundles independently constructed parts.
    pub fn from_parts(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn BookmarkStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self { auth, store, feed }
    }

    /// Builds the HTTP backend described by `config`.
    ///
    /// All three parts share one [`SessionCell`]; auth and rows also share
    /// one HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SmartmarkError::Config`] if a URL in `config` is invalid or
    /// the HTTP client cannot be built.
    pub fn http(config: &Config) -> Result<Self> {
        let http = Arc::new(
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.backend.timeout_seconds))
                .build()
                .map_err(|e| SmartmarkError::Config(format!("failed to build HTTP client: {e}")))?,
        );
        let cell = session_cell();

        let auth = auth::HttpAuth::new(Arc::clone(&http), config, Arc::clone(&cell))?;
        let store = rest::RestStore::new(Arc::clone(&http), config, Arc::clone(&cell))?;
        let feed = realtime::from_config(config, cell)?;

        Ok(Self::from_parts(Arc::new(auth), Arc::new(store), feed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    #[test]
    fn test_event_filter_parse() {
        assert_eq!("*".parse::<EventFilter>().unwrap(), EventFilter::All);
        assert_eq!(
            "delete".parse::<EventFilter>().unwrap(),
            EventFilter::Only(ChangeKind::Delete)
        );
        assert!("truncate".parse::<EventFilter>().is_err());
    }

    #[test]
    fn test_event_filter_matches() {
        assert!(EventFilter::All.matches(ChangeKind::Update));
        let only_insert = EventFilter::Only(ChangeKind::Insert);
        assert!(only_insert.matches(ChangeKind::Insert));
        assert!(!only_insert.matches(ChangeKind::Delete));
    }

    #[test]
    fn test_change_event_deserializes_both_type_spellings() {
        let a: ChangeEvent =
            serde_json::from_str(r#"{"type":"INSERT","schema":"public","table":"bookmarks"}"#)
                .unwrap();
        let b: ChangeEvent =
            serde_json::from_str(r#"{"eventType":"DELETE","table":"bookmarks"}"#).unwrap();
        assert_eq!(a.kind, ChangeKind::Insert);
        assert_eq!(b.kind, ChangeKind::Delete);
        assert_eq!(b.schema, "");
    }

    #[test]
    fn test_order_to_query() {
        assert_eq!(Order::newest_first().to_query(), "created_at.desc");
    }

    #[test]
    fn test_bearer_token_prefers_session() {
        let cell = session_cell();
        assert_eq!(bearer_token(&cell, "anon"), "anon");
        cell.send_replace(Some(Session {
            access_token: "jwt".to_string(),
            token_type: "bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            user: User {
                id: "u".to_string(),
                email: None,
            },
        }));
        assert_eq!(bearer_token(&cell, "anon"), "jwt");
    }

    #[tokio::test]
    async fn test_session_subscription_sees_changes() {
        let cell = session_cell();
        let mut sub = SessionSubscription::new(&cell);
        cell.send_replace(None);
        let next = sub.changed().await;
        assert_eq!(next, Some(None));
    }

    #[tokio::test]
    async fn test_change_subscription_drop_cancels_token() {
        let (_tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let sub = ChangeSubscription::new(rx, cancel.clone(), None);
        assert!(!cancel.is_cancelled());
        drop(sub);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_change_subscription_drop_closes_channel() {
        let (tx, rx) = mpsc::channel::<ChangeEvent>(4);
        let sub = ChangeSubscription::new(rx, CancellationToken::new(), None);
        sub.unsubscribe();
        assert!(tx.is_closed());
    }
}
