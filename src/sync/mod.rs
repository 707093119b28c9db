//! Client view-state synchronization
//!
//! Keeps a local, newest-first list of bookmarks consistent with the
//! backend:
//!
//! - a full fetch when a session is established,
//! - confirmed prepends on create (no optimistic insert),
//! - two-phase deletes: removed locally at once, restored if the remote
//!   delete fails,
//! - a full refetch whenever the change feed reports anything.
//!
//! [`state`] holds the pure transitions, [`synchronizer`] the async side.

pub mod state;
pub mod synchronizer;

pub use state::{Notice, NoticeLevel, Phase, ViewState};
pub use synchronizer::{SessionTransition, Synchronizer};
