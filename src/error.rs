//! Error types for Smartmark
//!
//! This module defines the error taxonomy used throughout the client,
//! using `thiserror` for ergonomic error handling. Failures of the remote
//! backend are always surfaced to the caller; nothing is silently dropped.

use thiserror::Error;

/// Main error type for Smartmark operations
///
/// Covers configuration loading, authentication, row store requests, the
/// realtime change feed and local input validation.
#[derive(Error, Debug)]
pub enum SmartmarkError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication errors (sign-in, token exchange, 401 responses)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// An operation that needs a session was attempted without one
    #[error("Not signed in: run `smartmark login` first")]
    NotSignedIn,

    /// The backend answered with a non-success status
    #[error("Backend error: status={status}, {message}")]
    Backend {
        /// HTTP status code returned by the backend
        status: u16,
        /// Response body or other detail
        message: String,
    },

    /// Realtime change feed errors
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// User input rejected before any remote request was made
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A remote delete failed and the local removal was rolled back
    #[error("Delete of bookmark {id} failed: {reason}")]
    DeleteFailed {
        /// Identifier of the bookmark that was restored
        id: String,
        /// Underlying failure
        reason: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type alias for Smartmark operations
///
/// Uses `anyhow::Error` so call sites can attach context while the typed
/// [`SmartmarkError`] stays recoverable through `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;
