//! In-memory fake backend for unit and integration tests
//!
//! [`FakeBackend`] implements [`AuthProvider`], [`BookmarkStore`] and
//! [`ChangeFeed`] over shared in-process state, so the synchronizer and the
//! top-level view can be driven without a network.
//!
//! Like the hosted service, the fake:
//!
//! - only returns rows owned by the signed-in user,
//! - assigns uuid ids and strictly increasing `created_at` timestamps on insert,
//! - broadcasts a [`ChangeEvent`] to every live subscription after each
//!   insert or delete, including the client's own.
//!
//! From the test side it can inject failures, hold deletes in flight with a
//! [`Notify`] gate, simulate another device's writes and count calls.
//!
//! # Example
//!
//! ```
//! use smartmark::backend::fake::FakeBackend;
//! use smartmark::backend::{BookmarkStore, Order};
//!
//! # tokio_test::block_on(async {
//! let fake = FakeBackend::signed_in("user-1");
//! fake.remote_insert("Rust", "https://rust-lang.org", "user-1");
//!
//! let rows = fake.select_all(&Order::newest_first()).await.unwrap();
//! assert_eq!(rows.len(), 1);
//! # });
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{
    session_cell, AuthProvider, Backend, BookmarkStore, ChangeEvent, ChangeFeed, ChangeKind,
    ChangeSubscription, EventFilter, Order, SessionCell, SessionSubscription,
};
use crate::error::{Result, SmartmarkError};
use crate::model::{Bookmark, NewBookmark, Session, User};

const SUBSCRIPTION_CAPACITY: usize = 64;

/// Call counters, one per backend operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeCalls {
    /// `select_all` calls
    pub select: usize,
    /// `insert` calls
    pub insert: usize,
    /// `delete` calls
    pub delete: usize,
    /// `subscribe` calls
    pub subscribe: usize,
    /// `sign_in` calls
    pub sign_in: usize,
    /// `sign_out` calls
    pub sign_out: usize,
}

struct Subscriber {
    table: String,
    filter: EventFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct FakeState {
    rows: Vec<Bookmark>,
    clock: Option<DateTime<Utc>>,
    sign_in_as: Option<Session>,
    fail_select: Option<String>,
    fail_insert: Option<String>,
    fail_delete: Option<String>,
    fail_sign_in: Option<String>,
    delete_gate: Option<Arc<Notify>>,
    calls: FakeCalls,
    subscribers: Vec<Subscriber>,
}

/// In-memory backend. Clones share state.
#[derive(Clone)]
pub struct FakeBackend {
    cell: SessionCell,
    state: Arc<Mutex<FakeState>>,
    table: String,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// A signed-out backend with an empty `bookmarks` table.
    pub fn new() -> Self {
        Self {
            cell: session_cell(),
            state: Arc::new(Mutex::new(FakeState::default())),
            table: "bookmarks".to_string(),
        }
    }

    /// A backend that already has a session for `user_id`.
    pub fn signed_in(user_id: &str) -> Self {
        let fake = Self::new();
        fake.set_session(Some(Self::session_for(user_id)));
        fake
    }

    /// Builds a non-expiring session for `user_id`.
    pub fn session_for(user_id: &str) -> Session {
        Session {
            access_token: format!("token-{user_id}"),
            token_type: "bearer".to_string(),
            refresh_token: Some(format!("refresh-{user_id}")),
            expires_at: None,
            user: User {
                id: user_id.to_string(),
                email: Some(format!("{user_id}@example.com")),
            },
        }
    }

    /// Bundles this fake as a [`Backend`].
    pub fn backend(&self) -> Backend {
        Backend::from_parts(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    /// Table name events are reported for.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- session ------------------------------------------------------------

    /// Publishes `session` as if the identity service changed it.
    pub fn set_session(&self, session: Option<Session>) {
        self.cell.send_replace(session);
    }

    /// Session that the next `sign_in` returns; defaults to `user-1`.
    pub fn sign_in_as(&self, session: Session) {
        self.lock().sign_in_as = Some(session);
    }

    fn current_user(&self) -> Option<String> {
        self.cell.borrow().as_ref().map(|s| s.user.id.clone())
    }

    // -- rows ---------------------------------------------------------------

    /// Inserts a row as another client would, and broadcasts the change.
    pub fn remote_insert(&self, title: &str, url: &str, user_id: &str) -> Bookmark {
        let row = {
            let mut state = self.lock();
            let row = Self::make_row(&mut state, title, url, user_id);
            state.rows.push(row.clone());
            row
        };
        self.broadcast(ChangeKind::Insert, Some(&row), None);
        row
    }

    /// Deletes a row as another client would, and broadcasts the change.
    pub fn remote_delete(&self, id: &str) -> Option<Bookmark> {
        let removed = {
            let mut state = self.lock();
            let pos = state.rows.iter().position(|b| b.id == id)?;
            state.rows.remove(pos)
        };
        self.broadcast(ChangeKind::Delete, None, Some(&removed));
        Some(removed)
    }

    /// Seeds a row with an explicit timestamp without broadcasting.
    pub fn seed(
        &self,
        title: &str,
        url: &str,
        user_id: &str,
        created_at: DateTime<Utc>,
    ) -> Bookmark {
        let row = Bookmark {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            url: url.to_string(),
            user_id: user_id.to_string(),
            created_at,
        };
        self.lock().rows.push(row.clone());
        row
    }

    /// Every stored row regardless of owner, in insertion order.
    pub fn rows(&self) -> Vec<Bookmark> {
        self.lock().rows.clone()
    }

    fn make_row(state: &mut FakeState, title: &str, url: &str, user_id: &str) -> Bookmark {
        let base = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let created_at = match state.clock {
            Some(last) => last + Duration::seconds(1),
            None => base,
        };
        state.clock = Some(created_at);
        Bookmark {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            url: url.to_string(),
            user_id: user_id.to_string(),
            created_at,
        }
    }

    // -- failure injection ----------------------------------------------------

    /// Makes `select_all` fail with `message` until cleared with `None`.
    pub fn fail_select(&self, message: Option<&str>) {
        self.lock().fail_select = message.map(str::to_string);
    }

    /// Makes `insert` fail with `message` until cleared with `None`.
    pub fn fail_insert(&self, message: Option<&str>) {
        self.lock().fail_insert = message.map(str::to_string);
    }

    /// Makes `delete` fail with `message` until cleared with `None`.
    pub fn fail_delete(&self, message: Option<&str>) {
        self.lock().fail_delete = message.map(str::to_string);
    }

    /// Makes `sign_in` fail with `message` until cleared with `None`.
    pub fn fail_sign_in(&self, message: Option<&str>) {
        self.lock().fail_sign_in = message.map(str::to_string);
    }

    /// Holds every later `delete` until the returned gate is notified once
    /// per held call.
    pub fn hold_deletes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().delete_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Stops holding deletes.
    pub fn release_deletes(&self) {
        self.lock().delete_gate = None;
    }

    // -- observation ----------------------------------------------------------

    /// Snapshot of the call counters.
    pub fn calls(&self) -> FakeCalls {
        self.lock().calls
    }

    /// Number of change subscriptions whose guard is still alive.
    pub fn active_subscriptions(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    /// Sends an arbitrary event to matching subscribers.
    pub fn emit(&self, event: ChangeEvent) {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        for sub in &state.subscribers {
            if sub.table == event.table && sub.filter.matches(event.kind) {
                if let Err(e) = sub.tx.try_send(event.clone()) {
                    tracing::debug!(error = %e, "Fake subscriber dropped an event");
                }
            }
        }
    }

    fn broadcast(&self, kind: ChangeKind, record: Option<&Bookmark>, old: Option<&Bookmark>) {
        let mut event = ChangeEvent::new(kind, &self.table);
        event.record = record.and_then(|b| serde_json::to_value(b).ok());
        event.old_record = old.and_then(|b| serde_json::to_value(b).ok());
        self.emit(event);
    }
}

#[async_trait::async_trait]
impl AuthProvider for FakeBackend {
    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self.cell.borrow().clone())
    }

    fn subscribe_sessions(&self) -> SessionSubscription {
        SessionSubscription::new(&self.cell)
    }

    async fn sign_in(&self, provider: &str) -> Result<Session> {
        let session = {
            let mut state = self.lock();
            state.calls.sign_in += 1;
            if let Some(ref message) = state.fail_sign_in {
                return Err(SmartmarkError::Authentication(message.clone()).into());
            }
            state
                .sign_in_as
                .clone()
                .unwrap_or_else(|| Self::session_for("user-1"))
        };
        tracing::debug!(provider, user_id = %session.user_id(), "Fake sign-in");
        self.cell.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.lock().calls.sign_out += 1;
        self.cell.send_replace(None);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BookmarkStore for FakeBackend {
    async fn select_all(&self, order: &Order) -> Result<Vec<Bookmark>> {
        let user = self.current_user();
        let mut state = self.lock();
        state.calls.select += 1;
        if let Some(ref message) = state.fail_select {
            return Err(SmartmarkError::Backend {
                status: 503,
                message: message.clone(),
            }
            .into());
        }

        let Some(user) = user else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Bookmark> = state
            .rows
            .iter()
            .filter(|b| b.user_id == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if !order.ascending {
            rows.reverse();
        }
        Ok(rows)
    }

    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark> {
        let user = self.current_user();
        let row = {
            let mut state = self.lock();
            state.calls.insert += 1;
            if let Some(ref message) = state.fail_insert {
                return Err(SmartmarkError::Backend {
                    status: 500,
                    message: message.clone(),
                }
                .into());
            }
            if user.as_deref() != Some(bookmark.user_id.as_str()) {
                return Err(SmartmarkError::Authentication(
                    "row violates row-level security policy".to_string(),
                )
                .into());
            }
            let row =
                Self::make_row(&mut state, &bookmark.title, &bookmark.url, &bookmark.user_id);
            state.rows.push(row.clone());
            row
        };
        self.broadcast(ChangeKind::Insert, Some(&row), None);
        Ok(row)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let gate = {
            let mut state = self.lock();
            state.calls.delete += 1;
            state.delete_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let user = self.current_user();
        let removed = {
            let mut state = self.lock();
            if let Some(ref message) = state.fail_delete {
                return Err(SmartmarkError::Backend {
                    status: 500,
                    message: message.clone(),
                }
                .into());
            }
            let pos = state
                .rows
                .iter()
                .position(|b| b.id == id && Some(&b.user_id) == user.as_ref());
            pos.map(|p| state.rows.remove(p))
        };
        if let Some(ref row) = removed {
            self.broadcast(ChangeKind::Delete, None, Some(row));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChangeFeed for FakeBackend {
    async fn subscribe(&self, table: &str, filter: EventFilter) -> Result<ChangeSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let mut state = self.lock();
        state.calls.subscribe += 1;
        state.subscribers.push(Subscriber {
            table: table.to_string(),
            filter,
            tx,
        });
        Ok(ChangeSubscription::new(rx, CancellationToken::new(), None))
    }
}
