//! One-shot bookmark commands: `list`, `add`, `delete`
//!
//! Each command establishes the session through a fresh [`Synchronizer`],
//! so the same rules apply as in the shell: a session is required, blank
//! input is rejected before any request, and failed deletes report
//! [`SmartmarkError::DeleteFailed`](crate::error::SmartmarkError::DeleteFailed).

use colored::Colorize;

use crate::backend::Backend;
use crate::error::{Result, SmartmarkError};
use crate::model::Bookmark;
use crate::render;
use crate::sync::Synchronizer;

async fn signed_in(backend: &Backend) -> Result<Synchronizer> {
    let sync = Synchronizer::new(backend.clone());
    if sync.establish_session().await?.is_none() {
        return Err(SmartmarkError::NotSignedIn.into());
    }
    Ok(sync)
}

/// Fetches the signed-in user's bookmarks, newest first.
pub async fn fetch(backend: &Backend) -> Result<Vec<Bookmark>> {
    let sync = signed_in(backend).await?;
    sync.refresh().await?;
    Ok(sync.snapshot().bookmarks().to_vec())
}

/// `list`: prints a table, or a JSON array with `json`.
pub async fn list(backend: &Backend, json: bool) -> Result<()> {
    let bookmarks = fetch(backend).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&bookmarks)?);
    } else {
        render::print_bookmarks(&bookmarks);
    }
    Ok(())
}

/// `add`: creates a bookmark and prints the confirmed row.
pub async fn add(backend: &Backend, title: &str, url: &str) -> Result<Bookmark> {
    let sync = signed_in(backend).await?;
    let bookmark = sync.create(title, url).await?;
    println!(
        "{} {} {}",
        "Added".green(),
        bookmark.title.bold(),
        format!("({})", bookmark.id).dimmed()
    );
    Ok(bookmark)
}

/// `delete`: deletes a bookmark by id.
pub async fn delete(backend: &Backend, id: &str) -> Result<()> {
    let sync = signed_in(backend).await?;
    sync.delete(id).await?;
    println!("{}", format!("Deleted bookmark {id}").green());
    Ok(())
}
