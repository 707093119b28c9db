//! Identity service client
//!
//! [`HttpAuth`] implements [`AuthProvider`] on top of:
//!
//! - [`flow::OAuthFlow`] -- federated sign-in, token refresh and logout.
//! - [`session_store::SessionStore`] -- keyring persistence so a session
//!   survives across process runs.
//! - the shared [`SessionCell`] -- every accepted, refreshed or cleared
//!   session is published there, which is what session subscribers see.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AuthProvider, SessionCell, SessionSubscription};
use crate::config::Config;
use crate::error::{Result, SmartmarkError};
use crate::model::Session;

pub mod flow;
pub mod pkce;
pub mod session_store;

use flow::{OAuthFlow, OAuthFlowConfig};
use session_store::SessionStore;

/// HTTP implementation of [`AuthProvider`].
pub struct HttpAuth {
    flow: OAuthFlow,
    store: Option<SessionStore>,
    cell: SessionCell,
}

impl HttpAuth {
    /// Builds the client for the project in `config`, persisting sessions
    /// in the OS keyring.
    pub fn new(http: Arc<reqwest::Client>, config: &Config, cell: SessionCell) -> Result<Self> {
        let flow_config = OAuthFlowConfig::for_project(
            &config.backend.url,
            &config.backend.anon_key,
            config.auth.redirect_port,
            Duration::from_secs(config.auth.callback_timeout_seconds),
        )?;
        Ok(Self {
            flow: OAuthFlow::new(http, flow_config),
            store: Some(SessionStore::new(&config.project_ref())),
            cell,
        })
    }

    /// Builds a client that keeps sessions in memory only.
    pub fn without_persistence(
        http: Arc<reqwest::Client>,
        flow_config: OAuthFlowConfig,
        cell: SessionCell,
    ) -> Self {
        Self {
            flow: OAuthFlow::new(http, flow_config),
            store: None,
            cell,
        }
    }

    /// Seeds the client with a known session (restored from elsewhere).
    pub fn adopt(&self, session: Session) {
        self.persist(Some(&session));
        self.cell.send_replace(Some(session));
    }

    /// Keyring failures are logged, not fatal: an in-memory session is
    /// still usable for this run.
    fn persist(&self, session: Option<&Session>) {
        let Some(ref store) = self.store else {
            return;
        };
        let result = match session {
            Some(s) => store.save(s),
            None => store.delete(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Could not update stored session");
        }
    }

    fn load_persisted(&self) -> Option<Session> {
        let store = self.store.as_ref()?;
        match store.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read stored session");
                None
            }
        }
    }

    fn clear(&self) {
        self.persist(None);
        self.cell.send_replace(None);
    }

    /// Renews an expired session.
    ///
    /// A rejected refresh token ends the session (`Ok(None)`); transport
    /// failures are returned so an offline client stays signed in.
    async fn refresh_session(&self, session: Session) -> Result<Option<Session>> {
        let Some(ref refresh_token) = session.refresh_token else {
            tracing::info!("Session expired and has no refresh token");
            self.clear();
            return Ok(None);
        };

        match self.flow.refresh(refresh_token).await {
            Ok(renewed) => {
                tracing::debug!(user_id = %renewed.user_id(), "Session refreshed");
                self.persist(Some(&renewed));
                self.cell.send_replace(Some(renewed.clone()));
                Ok(Some(renewed))
            }
            Err(e)
                if matches!(
                    e.downcast_ref::<SmartmarkError>(),
                    Some(SmartmarkError::Authentication(_))
                ) =>
            {
                tracing::warn!(error = %e, "Refresh token rejected; signing out");
                self.clear();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for HttpAuth {
    async fn current_session(&self) -> Result<Option<Session>> {
        let cached = self.cell.borrow().clone();
        let from_cell = cached.is_some();

        let session = match cached {
            Some(s) => s,
            None => match self.load_persisted() {
                Some(s) => s,
                None => return Ok(None),
            },
        };

        if session.is_expired() {
            return self.refresh_session(session).await;
        }

        if !from_cell {
            tracing::debug!(user_id = %session.user_id(), "Restored stored session");
            self.cell.send_replace(Some(session.clone()));
        }
        Ok(Some(session))
    }

    fn subscribe_sessions(&self) -> SessionSubscription {
        SessionSubscription::new(&self.cell)
    }

    async fn sign_in(&self, provider: &str) -> Result<Session> {
        tracing::info!(provider, "Starting federated sign-in");
        let session = self.flow.authorize(provider).await?;
        tracing::info!(user_id = %session.user_id(), "Signed in");
        self.persist(Some(&session));
        self.cell.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let current = self.cell.borrow().clone();
        if let Some(session) = current {
            if let Err(e) = self.flow.logout(&session.access_token).await {
                tracing::warn!(error = %e, "Server-side logout failed; clearing local session");
            }
        }
        self.clear();
        tracing::info!("Signed out");
        Ok(())
    }
}
