//! Async driver for [`ViewState`]
//!
//! The synchronizer pairs the backend with a `watch` channel of view
//! snapshots. Each operation talks to the backend and then applies a
//! [`ViewState`] transition; every transition is published so a renderer
//! can follow along.
//!
//! Failures are returned to the caller *and* recorded as a [`Notice`] on
//! the view, so an interactive view can show them without further
//! plumbing.

use tokio::sync::watch;

use crate::backend::{Backend, Order};
use crate::error::{Result, SmartmarkError};
use crate::model::{Bookmark, NewBookmark, Session};
use crate::sync::state::{Notice, ViewState};

/// What a session change means for the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// Nothing relevant changed
    Unchanged,
    /// A session appeared
    SignedIn,
    /// The session went away
    SignedOut,
    /// A different user is now signed in
    Switched,
    /// Same user, new tokens
    Refreshed,
}

impl SessionTransition {
    /// Classifies the change from `old` to `new`.
    pub fn between(old: Option<&Session>, new: Option<&Session>) -> Self {
        match (old, new) {
            (None, None) => SessionTransition::Unchanged,
            (None, Some(_)) => SessionTransition::SignedIn,
            (Some(_), None) => SessionTransition::SignedOut,
            (Some(a), Some(b)) if a.user.id != b.user.id => SessionTransition::Switched,
            (Some(a), Some(b)) if a.access_token != b.access_token => {
                SessionTransition::Refreshed
            }
            (Some(_), Some(_)) => SessionTransition::Unchanged,
        }
    }

    /// Whether the list must be fetched and the change feed re-acquired.
    pub fn needs_resync(&self) -> bool {
        matches!(
            self,
            SessionTransition::SignedIn | SessionTransition::Switched
        )
    }

    /// Whether the change feed must be re-acquired. Feeds authenticate
    /// when they connect, so new tokens need a new subscription.
    pub fn needs_resubscribe(&self) -> bool {
        self.needs_resync() || matches!(self, SessionTransition::Refreshed)
    }
}

/// Keeps a [`ViewState`] consistent with the backend.
pub struct Synchronizer {
    backend: Backend,
    state: watch::Sender<ViewState>,
    order: Order,
}

impl Synchronizer {
    /// Creates a synchronizer with an empty, signed-out view.
    pub fn new(backend: Backend) -> Self {
        let (state, _rx) = watch::channel(ViewState::default());
        Self {
            backend,
            state,
            order: Order::newest_first(),
        }
    }

    /// The backend this synchronizer talks to.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    /// Copy of the current view.
    pub fn snapshot(&self) -> ViewState {
        self.state.borrow().clone()
    }

    fn current_user_id(&self) -> Option<String> {
        self.state
            .borrow()
            .session()
            .map(|s| s.user_id().to_string())
    }

    /// Records `error` as a notice and hands it back.
    fn fail<T>(&self, context: &str, error: anyhow::Error) -> Result<T> {
        let message = format!("{context}: {error}");
        self.state.send_modify(|s| s.notify(Notice::error(message)));
        Err(error)
    }

    fn require_user(&self, context: &str) -> Result<String> {
        match self.current_user_id() {
            Some(id) => Ok(id),
            None => self.fail(context, SmartmarkError::NotSignedIn.into()),
        }
    }

    /// Queries the identity service and adopts whatever session it has.
    pub async fn establish_session(&self) -> Result<Option<Session>> {
        let session = match self.backend.auth.current_session().await {
            Ok(session) => session,
            Err(e) => return self.fail("Could not restore session", e),
        };
        self.apply_session(session.clone());
        Ok(session)
    }

    /// Installs `session` in the view and reports what kind of change it was.
    pub fn apply_session(&self, session: Option<Session>) -> SessionTransition {
        let mut transition = SessionTransition::Unchanged;
        self.state.send_if_modified(|s| {
            transition = SessionTransition::between(s.session(), session.as_ref());
            if transition == SessionTransition::Unchanged {
                return false;
            }
            s.set_session(session);
            true
        });
        if transition != SessionTransition::Unchanged {
            tracing::debug!(?transition, "Session changed");
        }
        transition
    }

    /// Fetches the full list and replaces the local one.
    ///
    /// On failure the list is left unchanged. A result that arrives after
    /// the session changed is discarded.
    ///
    /// # Errors
    ///
    /// [`SmartmarkError::NotSignedIn`] without a session, otherwise the
    /// backend's error.
    pub async fn refresh(&self) -> Result<usize> {
        let user_id = self.require_user("Could not load bookmarks")?;

        let rows = match self.backend.store.select_all(&self.order).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Refresh failed");
                return self.fail("Could not load bookmarks", e);
            }
        };

        let count = rows.len();
        let applied = self.state.send_if_modified(|s| {
            if s.session().map(|x| x.user_id()) != Some(user_id.as_str()) {
                return false;
            }
            s.replace_all(rows);
            true
        });
        if applied {
            tracing::debug!(count, "List refreshed");
        } else {
            tracing::debug!("Discarding refresh for a previous session");
        }
        Ok(count)
    }

    /// Inserts a bookmark and prepends the confirmed row.
    ///
    /// Title and url are trimmed; if either is empty nothing is sent.
    pub async fn create(&self, title: &str, url: &str) -> Result<Bookmark> {
        let user_id = self.require_user("Could not add bookmark")?;
        let new = match NewBookmark::new(title, url, &user_id) {
            Ok(new) => new,
            Err(e) => return self.fail("Could not add bookmark", e),
        };

        match self.backend.store.insert(&new).await {
            Ok(row) => {
                tracing::info!(bookmark_id = %row.id, "Bookmark added");
                let confirmed = row.clone();
                self.state.send_if_modified(|s| {
                    if s.session().map(|x| x.user_id()) != Some(user_id.as_str()) {
                        return false;
                    }
                    s.prepend_confirmed(confirmed);
                    s.clear_notice();
                    true
                });
                Ok(row)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Insert failed");
                self.fail("Could not add bookmark", e)
            }
        }
    }

    /// Removes `id` locally, then deletes it remotely.
    ///
    /// On remote failure the bookmark is put back and
    /// [`SmartmarkError::DeleteFailed`] is returned.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.require_user("Could not delete bookmark")?;

        let mut present = false;
        self.state.send_modify(|s| present = s.begin_delete(id));
        tracing::debug!(bookmark_id = %id, present, "Delete started");

        match self.backend.store.delete(id).await {
            Ok(()) => {
                self.state.send_modify(|s| {
                    s.commit_delete(id);
                    s.clear_notice();
                });
                tracing::info!(bookmark_id = %id, "Bookmark deleted");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(bookmark_id = %id, error = %reason, "Delete failed; restoring");
                self.state.send_modify(|s| {
                    s.rollback_delete(id);
                    s.notify(Notice::error(format!("Could not delete bookmark: {reason}")));
                });
                Err(SmartmarkError::DeleteFailed {
                    id: id.to_string(),
                    reason,
                }
                .into())
            }
        }
    }

    /// Runs the federated sign-in flow and adopts the resulting session.
    pub async fn sign_in(&self, provider: &str) -> Result<SessionTransition> {
        match self.backend.auth.sign_in(provider).await {
            Ok(session) => Ok(self.apply_session(Some(session))),
            Err(e) => self.fail("Sign-in failed", e),
        }
    }

    /// Ends the session and clears the view.
    pub async fn sign_out(&self) -> Result<()> {
        if let Err(e) = self.backend.auth.sign_out().await {
            return self.fail("Sign-out failed", e);
        }
        self.apply_session(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::sync::state::{NoticeLevel, Phase};

    #[test]
    fn test_transition_classification() {
        let a = FakeBackend::session_for("a");
        let mut a2 = a.clone();
        a2.access_token = "renewed".to_string();
        let b = FakeBackend::session_for("b");

        assert_eq!(
            SessionTransition::between(None, None),
            SessionTransition::Unchanged
        );
        assert_eq!(
            SessionTransition::between(None, Some(&a)),
            SessionTransition::SignedIn
        );
        assert_eq!(
            SessionTransition::between(Some(&a), None),
            SessionTransition::SignedOut
        );
        assert_eq!(
            SessionTransition::between(Some(&a), Some(&b)),
            SessionTransition::Switched
        );
        assert_eq!(
            SessionTransition::between(Some(&a), Some(&a2)),
            SessionTransition::Refreshed
        );
        assert_eq!(
            SessionTransition::between(Some(&a), Some(&a)),
            SessionTransition::Unchanged
        );
        assert!(SessionTransition::SignedIn.needs_resync());
        assert!(!SessionTransition::Refreshed.needs_resync());
        assert!(SessionTransition::Refreshed.needs_resubscribe());
        assert!(SessionTransition::Switched.needs_resubscribe());
        assert!(!SessionTransition::Unchanged.needs_resubscribe());
        assert!(!SessionTransition::SignedOut.needs_resubscribe());
    }

    #[tokio::test]
    async fn test_refresh_requires_session() {
        let fake = FakeBackend::new();
        let sync = Synchronizer::new(fake.backend());
        let err = sync.refresh().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SmartmarkError>(),
            Some(SmartmarkError::NotSignedIn)
        ));
        assert_eq!(fake.calls().select, 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_list_and_records_notice() {
        let fake = FakeBackend::signed_in("u1");
        fake.remote_insert("a", "https://a", "u1");
        let sync = Synchronizer::new(fake.backend());
        sync.establish_session().await.unwrap();
        sync.refresh().await.unwrap();

        fake.fail_select(Some("unavailable"));
        assert!(sync.refresh().await.is_err());

        let view = sync.snapshot();
        assert_eq!(view.bookmarks().len(), 1);
        assert_eq!(view.notice().map(|n| n.level), Some(NoticeLevel::Error));
    }

    #[tokio::test]
    async fn test_refresh_after_local_sign_out_is_rejected() {
        let fake = FakeBackend::signed_in("u1");
        fake.remote_insert("a", "https://a", "u1");
        let sync = Synchronizer::new(fake.backend());
        sync.establish_session().await.unwrap();

        sync.apply_session(None);
        assert!(sync.refresh().await.is_err());
        assert_eq!(sync.snapshot().phase(), Phase::Unauthenticated);
        assert_eq!(fake.calls().select, 0);
    }

    #[tokio::test]
    async fn test_create_without_session_sends_nothing() {
        let fake = FakeBackend::new();
        let sync = Synchronizer::new(fake.backend());
        assert!(sync.create("t", "https://t").await.is_err());
        assert_eq!(fake.calls().insert, 0);
        assert!(sync.snapshot().notice().is_some());
    }

    #[tokio::test]
    async fn test_sign_in_reports_transition() {
        let fake = FakeBackend::new();
        let sync = Synchronizer::new(fake.backend());
        assert_eq!(
            sync.sign_in("google").await.unwrap(),
            SessionTransition::SignedIn
        );
        assert_eq!(
            sync.sign_in("google").await.unwrap(),
            SessionTransition::Unchanged
        );
    }

    #[tokio::test]
    async fn test_sign_out_clears_view() {
        let fake = FakeBackend::signed_in("u1");
        fake.remote_insert("a", "https://a", "u1");
        let sync = Synchronizer::new(fake.backend());
        sync.establish_session().await.unwrap();
        sync.refresh().await.unwrap();

        sync.sign_out().await.unwrap();
        let view = sync.snapshot();
        assert!(view.session().is_none());
        assert!(view.bookmarks().is_empty());
        assert_eq!(fake.calls().sign_out, 1);
    }
}
