//! Session persistence via OS keyring
//!
//! Sessions are serialized to JSON and stored in the operating system's
//! native credential store (Keychain on macOS, Secret Service on Linux,
//! Windows Credential Manager on Windows), one entry per backend project.

use crate::error::{Result, SmartmarkError};
use crate::model::Session;

/// Keyring accessor for a single backend project's session.
///
/// # Examples
///
/// ```no_run
/// use smartmark::backend::auth::session_store::SessionStore;
///
/// let store = SessionStore::new("abc");
/// if let Some(session) = store.load().unwrap() {
///     println!("signed in as {}", session.display_name());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SessionStore {
    project: String,
}

impl SessionStore {
    /// Creates an accessor for `project`.
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
        }
    }

    /// Keyring service name, prefixed to avoid collisions with other apps.
    fn service_name(&self) -> String {
        format!("smartmark-session-{}", self.project)
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service_name(), &self.project)
            .map_err(|e| SmartmarkError::Keyring(e).into())
    }

    /// Persists `session`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`SmartmarkError::Keyring`] if the credential store rejects
    /// the write.
    pub fn save(&self, session: &Session) -> Result<()> {
        let json_str = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&json_str)
            .map_err(SmartmarkError::Keyring)?;
        Ok(())
    }

    /// Loads the stored session, or `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`SmartmarkError::Keyring`] on unexpected credential store
    /// errors, or [`SmartmarkError::Serialization`] if the stored JSON is
    /// malformed.
    pub fn load(&self) -> Result<Option<Session>> {
        match self.entry()?.get_password() {
            Ok(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SmartmarkError::Keyring(e).into()),
        }
    }

    /// Removes the stored session. Deleting a missing entry is a no-op.
    pub fn delete(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SmartmarkError::Keyring(e).into()),
        }
    }
}
