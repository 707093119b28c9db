//! Command-line interface definition for smartmark
//!
//! This module defines the CLI structure using clap's derive API:
//! one-shot bookmark and session commands plus the interactive shell.

use clap::{Parser, Subcommand};

/// smartmark - personal bookmarks synced with a hosted backend
///
/// Sign in with a federated identity provider, then list, add and delete
/// bookmarks. The `shell` command keeps a live view that follows changes
/// made from other devices.
#[derive(Parser, Debug, Clone)]
#[command(name = "smartmark")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for smartmark
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Sign in through the identity provider in a browser
    Login {
        /// Override the provider from config (google, github, ...)
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List bookmarks, newest first
    List {
        /// Print a JSON array instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Add a bookmark
    Add {
        /// Bookmark title
        #[arg(short, long)]
        title: String,

        /// Bookmark URL
        #[arg(short, long)]
        url: String,
    },

    /// Delete a bookmark by id
    Delete {
        /// Bookmark id as shown by `list`
        id: String,
    },

    /// Open the interactive, live-updating bookmark view
    Shell,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Configuration path, falling back to the default location.
    pub fn config_path(&self) -> &str {
        self.config.as_deref().unwrap_or("config/config.yaml")
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            command: Commands::Whoami,
        }
    }
}
