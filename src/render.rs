//! Terminal rendering of the bookmark view
//!
//! Rendering is split into pure `render_*` functions that build strings
//! (tested directly) and `print_*` helpers for one-shot commands.

use colored::Colorize;
use prettytable::{format, Table};

use crate::model::{Bookmark, Session};
use crate::sync::{NoticeLevel, ViewState};

/// Shown in place of the list when nobody is signed in.
pub const SIGN_IN_PROMPT: &str = "Sign in with `login` to see your bookmarks.";

/// Shown when a signed-in user has no bookmarks.
pub const EMPTY_LIST: &str = "No bookmarks yet. Add one!";

const TITLE_WIDTH: usize = 40;
const URL_WIDTH: usize = 60;

/// Shortens `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Builds the bookmark table with 1-based positions usable as `#n`.
pub fn bookmark_table(bookmarks: &[Bookmark]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "#".bold(),
        "Title".bold(),
        "URL".bold(),
        "Added".bold(),
        "ID".bold()
    ]);

    for (i, bookmark) in bookmarks.iter().enumerate() {
        let added = bookmark
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();
        let position = i + 1;
        table.add_row(prettytable::row![
            position,
            truncate(&bookmark.title, TITLE_WIDTH),
            truncate(&bookmark.url, URL_WIDTH).cyan(),
            added,
            bookmark.id.dimmed()
        ]);
    }
    table
}

/// Header line naming the signed-in user.
pub fn render_header(session: Option<&Session>) -> String {
    match session {
        Some(s) => format!("Signed in as {}", s.display_name().green()),
        None => "Not signed in".yellow().to_string(),
    }
}

/// Renders the list (or the sign-in prompt) and the current notice.
pub fn render_view(view: &ViewState) -> String {
    let mut out = String::new();
    out.push_str(&render_header(view.session()));
    out.push('\n');

    if !view.shows_list() {
        out.push_str(SIGN_IN_PROMPT);
        out.push('\n');
    } else if view.bookmarks().is_empty() {
        out.push_str(&EMPTY_LIST.yellow().to_string());
        out.push('\n');
    } else {
        out.push_str(&bookmark_table(view.bookmarks()).to_string());
    }

    if let Some(notice) = view.notice() {
        let line = match notice.level {
            NoticeLevel::Info => notice.message.normal(),
            NoticeLevel::Error => notice.message.red(),
        };
        out.push_str(&format!("{line}\n"));
    }
    out
}

/// Prints a bookmark list for one-shot commands.
pub fn print_bookmarks(bookmarks: &[Bookmark]) {
    if bookmarks.is_empty() {
        println!("{}", EMPTY_LIST.yellow());
        return;
    }
    bookmark_table(bookmarks).printstd();
}

/// Shell help text.
pub fn shell_help() -> String {
    [
        "Commands:",
        "  add <title> <url>   add a bookmark (the last word is the url)",
        "  delete <id | #n>    delete by id or by list position",
        "  refresh             reload the list",
        "  login [provider]    sign in",
        "  logout              sign out",
        "  help                show this help",
        "  quit                leave the shell",
    ]
    .join("\n")
}
