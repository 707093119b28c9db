//! View state and its transitions
//!
//! [`ViewState`] is plain data: every transition is a synchronous method,
//! so the rules for ordering, de-duplication and tentative deletes can be
//! tested without a backend. The async [`Synchronizer`](super::Synchronizer)
//! decides *when* to apply them.

use std::fmt;

use crate::model::{sort_newest_first, Bookmark, Session};

/// Coarse view phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session; the sign-in affordance is shown
    Unauthenticated,
    /// Signed in with no bookmarks
    Empty,
    /// Signed in with at least one bookmark
    Populated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Unauthenticated => write!(f, "unauthenticated"),
            Phase::Empty => write!(f, "empty"),
            Phase::Populated => write!(f, "populated"),
        }
    }
}

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational
    Info,
    /// A failed operation
    Error,
}

/// A one-line message shown under the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Text shown to the user
    pub message: String,
}

impl Notice {
    /// Informational notice.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    /// Error notice.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// A bookmark removed locally whose remote delete has not settled.
#[derive(Debug, Clone, PartialEq)]
struct PendingDelete {
    id: String,
    removed: Option<Bookmark>,
}

/// Everything the view renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    session: Option<Session>,
    bookmarks: Vec<Bookmark>,
    pending_deletes: Vec<PendingDelete>,
    notice: Option<Notice>,
}

impl ViewState {
    /// Current session, if signed in.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Local list, newest first.
    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    /// Latest notice, if any.
    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Derived phase.
    pub fn phase(&self) -> Phase {
        match (&self.session, self.bookmarks.is_empty()) {
            (None, _) => Phase::Unauthenticated,
            (Some(_), true) => Phase::Empty,
            (Some(_), false) => Phase::Populated,
        }
    }

    /// The list is shown iff a session is present.
    pub fn shows_list(&self) -> bool {
        self.session.is_some()
    }

    /// Returns `true` while a delete of `id` is in flight.
    pub fn is_pending_delete(&self, id: &str) -> bool {
        self.pending_deletes.iter().any(|p| p.id == id)
    }

    /// Looks up a bookmark by its 1-based position in the list.
    pub fn bookmark_at(&self, position: usize) -> Option<&Bookmark> {
        position.checked_sub(1).and_then(|i| self.bookmarks.get(i))
    }

    /// Replaces the session.
    ///
    /// Signing out, or switching to a different user, drops the list and
    /// every pending delete since they belong to the previous identity.
    pub fn set_session(&mut self, session: Option<Session>) {
        let same_user = match (&self.session, &session) {
            (Some(a), Some(b)) => a.user.id == b.user.id,
            _ => false,
        };
        if !same_user {
            self.bookmarks.clear();
            self.pending_deletes.clear();
            self.notice = None;
        }
        self.session = session;
    }

    /// Replaces the list wholesale with a fetched snapshot.
    ///
    /// Rows with a delete in flight are left out so a refresh cannot
    /// resurrect them before the delete settles.
    pub fn replace_all(&mut self, mut rows: Vec<Bookmark>) {
        rows.retain(|b| !self.is_pending_delete(&b.id));
        sort_newest_first(&mut rows);
        self.bookmarks = rows;
    }

    /// Puts a backend-confirmed bookmark at the head of the list.
    ///
    /// If a refresh already delivered the same row it is moved, not
    /// duplicated.
    pub fn prepend_confirmed(&mut self, bookmark: Bookmark) {
        self.bookmarks.retain(|b| b.id != bookmark.id);
        self.bookmarks.insert(0, bookmark);
    }

    /// Tentatively removes `id`. Returns `true` when it was in the list.
    pub fn begin_delete(&mut self, id: &str) -> bool {
        let removed = self
            .bookmarks
            .iter()
            .position(|b| b.id == id)
            .map(|pos| self.bookmarks.remove(pos));
        let present = removed.is_some();
        self.pending_deletes.push(PendingDelete {
            id: id.to_string(),
            removed,
        });
        present
    }

    /// Forgets the pending entry after the remote delete succeeded.
    pub fn commit_delete(&mut self, id: &str) {
        self.pending_deletes.retain(|p| p.id != id);
    }

    /// Restores a tentatively removed bookmark at its ordered position.
    /// Returns `true` when something was put back.
    pub fn rollback_delete(&mut self, id: &str) -> bool {
        let Some(pos) = self.pending_deletes.iter().position(|p| p.id == id) else {
            return false;
        };
        let pending = self.pending_deletes.remove(pos);
        let Some(bookmark) = pending.removed else {
            return false;
        };
        if self.bookmarks.iter().any(|b| b.id == bookmark.id) {
            return false;
        }
        let at = self
            .bookmarks
            .partition_point(|b| b.created_at >= bookmark.created_at);
        self.bookmarks.insert(at, bookmark);
        true
    }

    /// Records a notice, replacing the previous one.
    pub fn notify(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    /// Clears the notice.
    pub fn clear_notice(&mut self) {
        self.notice = None;
    }
}
