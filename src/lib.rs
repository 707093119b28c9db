//! smartmark - personal bookmarks synced with a hosted backend
//!
//! This library keeps a local, newest-first list of bookmarks consistent
//! with a Supabase-compatible backend that provides identity, row storage
//! and realtime change notifications.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `model`: Session, Bookmark and insert payload types
//! - `backend`: collaborator traits plus HTTP and in-memory implementations
//! - `sync`: view state transitions and the async synchronizer
//! - `app`: the top-level view with scoped subscriptions and event loop
//! - `render`: terminal rendering
//! - `commands`: CLI command handlers and the interactive shell
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `logging`: tracing subscriber setup
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```
//! use smartmark::backend::fake::FakeBackend;
//! use smartmark::sync::Synchronizer;
//!
//! # tokio_test::block_on(async {
//! let fake = FakeBackend::signed_in("user-1");
//! let sync = Synchronizer::new(fake.backend());
//!
//! sync.establish_session().await?;
//! sync.create("Rust", "https://www.rust-lang.org").await?;
//! assert_eq!(sync.snapshot().bookmarks()[0].title, "Rust");
//! # Ok::<(), anyhow::Error>(())
//! # }).unwrap();
//! ```

pub mod app;
pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod render;
pub mod sync;

// Re-export commonly used types
pub use app::{App, AppOptions, Command};
pub use backend::Backend;
pub use config::Config;
pub use error::{Result, SmartmarkError};
pub use model::{Bookmark, NewBookmark, Session};
pub use sync::{Synchronizer, ViewState};
