//! Command handlers for smartmark
//!
//! - [`auth`] -- `login`, `logout`, `whoami`
//! - [`bookmarks`] -- one-shot `list`, `add`, `delete`
//! - [`shell`] -- the interactive, live-updating view

pub mod auth;
pub mod bookmarks;
pub mod shell;
