//! Top-level view
//!
//! [`App`] owns the [`Synchronizer`] and the two scoped subscriptions the
//! view holds while it is mounted:
//!
//! - a [`SessionSubscription`] for the whole lifetime of the view,
//! - a [`ChangeSubscription`] while a session is present.
//!
//! The change subscription is always released before a new one is
//! acquired, and both are released when [`App::run`] returns on any path.
//! A token refresh renews the change subscription without refetching.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::backend::{
    Backend, ChangeEvent, ChangeSubscription, EventFilter, SessionSubscription,
};
use crate::config::Config;
use crate::error::Result;
use crate::model::Session;
use crate::sync::{SessionTransition, Synchronizer, ViewState};

/// How often the loop asks the identity service to revalidate the session.
const DEFAULT_SESSION_CHECK: Duration = Duration::from_secs(60);

/// User intents delivered to the view loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a bookmark
    Add {
        /// Title as typed
        title: String,
        /// Url as typed
        url: String,
    },
    /// Delete a bookmark by id
    Delete(String),
    /// Force a full refresh
    Refresh,
    /// Sign in, optionally with a provider other than the configured one
    SignIn(Option<String>),
    /// Sign out
    SignOut,
    /// Leave the loop
    Quit,
}

/// Knobs for [`App`].
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Table the change feed watches
    pub table: String,
    /// Change kinds that trigger a refresh
    pub filter: EventFilter,
    /// Subscribe to the change feed at all
    pub realtime: bool,
    /// Identity provider for sign-in
    pub provider: String,
    /// Session revalidation period
    pub session_check: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            table: "bookmarks".to_string(),
            filter: EventFilter::All,
            realtime: true,
            provider: "google".to_string(),
            session_check: DEFAULT_SESSION_CHECK,
        }
    }
}

impl AppOptions {
    /// Reads the options from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            table: config.backend.table.clone(),
            filter: config.event_filter()?,
            realtime: config.realtime.enabled,
            provider: config.auth.provider.clone(),
            session_check: DEFAULT_SESSION_CHECK,
        })
    }
}

/// The mounted view.
pub struct App {
    sync: Synchronizer,
    options: AppOptions,
    sessions: Option<SessionSubscription>,
    changes: Option<ChangeSubscription>,
}

impl App {
    /// Creates an unmounted view.
    pub fn new(backend: Backend, options: AppOptions) -> Self {
        Self {
            sync: Synchronizer::new(backend),
            options,
            sessions: None,
            changes: None,
        }
    }

    /// The synchronizer driving this view.
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Receiver of view snapshots for rendering.
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.sync.subscribe()
    }

    /// Whether a change subscription is currently held.
    pub fn is_subscribed(&self) -> bool {
        self.changes.is_some()
    }

    /// Acquires the session subscription, establishes the session, and
    /// synchronizes the list if signed in.
    ///
    /// Session restore failures are recorded on the view rather than
    /// returned, so the view still mounts signed out.
    pub async fn mount(&mut self) -> Result<()> {
        self.sessions = Some(self.sync.backend().auth.subscribe_sessions());

        match self.sync.establish_session().await {
            Ok(Some(session)) => {
                tracing::info!(user_id = %session.user_id(), "Mounted with session");
                self.resync().await;
            }
            Ok(None) => tracing::info!("Mounted without session"),
            Err(e) => tracing::warn!(error = %e, "Could not establish session"),
        }
        Ok(())
    }

    /// Releases every subscription.
    pub fn unmount(&mut self) {
        self.release_changes();
        self.sessions = None;
        tracing::debug!("Unmounted");
    }

    fn release_changes(&mut self) {
        if let Some(sub) = self.changes.take() {
            sub.unsubscribe();
            tracing::debug!(table = %self.options.table, "Change subscription released");
        }
    }

    /// Re-acquires the change feed and fetches the full list.
    async fn resync(&mut self) {
        self.resubscribe().await;

        if let Err(e) = self.sync.refresh().await {
            tracing::warn!(error = %e, "Initial refresh failed");
        }
    }

    /// Releases the change feed, then acquires a new one.
    async fn resubscribe(&mut self) {
        self.release_changes();

        if self.options.realtime {
            match self
                .sync
                .backend()
                .feed
                .subscribe(&self.options.table, self.options.filter)
                .await
            {
                Ok(sub) => {
                    tracing::debug!(table = %self.options.table, "Change subscription acquired");
                    self.changes = Some(sub);
                }
                Err(e) => tracing::warn!(error = %e, "Could not subscribe to changes"),
            }
        }
    }

    /// Applies a session published by the identity service.
    pub async fn handle_session_change(&mut self, session: Option<Session>) {
        let transition = self.sync.apply_session(session);
        match transition {
            SessionTransition::SignedOut => {
                tracing::info!("Session ended");
                self.release_changes();
            }
            t if t.needs_resync() => self.resync().await,
            t if t.needs_resubscribe() => {
                tracing::debug!("Session tokens refreshed");
                self.resubscribe().await;
            }
            _ => {}
        }
    }

    /// Refreshes once for `event` and every change already queued behind it.
    pub async fn handle_change(&mut self, event: ChangeEvent) {
        let mut coalesced = 1usize;
        if let Some(sub) = self.changes.as_mut() {
            while sub.try_next().is_some() {
                coalesced += 1;
            }
        }
        tracing::debug!(kind = %event.kind, coalesced, "Change notification");

        if let Err(e) = self.sync.refresh().await {
            tracing::warn!(error = %e, "Refresh after change failed");
        }
    }

    /// Executes one user command. Returns `false` when the loop should end.
    ///
    /// Failures are already recorded on the view as notices; here they are
    /// only logged and never end the loop.
    pub async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Add { title, url } => {
                if let Err(e) = self.sync.create(&title, &url).await {
                    self.report("add", &e);
                }
            }
            Command::Delete(id) => {
                if let Err(e) = self.sync.delete(&id).await {
                    self.report("delete", &e);
                }
            }
            Command::Refresh => {
                if let Err(e) = self.sync.refresh().await {
                    self.report("refresh", &e);
                }
            }
            Command::SignIn(provider) => {
                let provider = provider.unwrap_or_else(|| self.options.provider.clone());
                match self.sync.sign_in(&provider).await {
                    Ok(transition) if transition.needs_resync() => self.resync().await,
                    Ok(transition) if transition.needs_resubscribe() => self.resubscribe().await,
                    Ok(_) => {}
                    Err(e) => self.report("sign-in", &e),
                }
            }
            Command::SignOut => {
                if let Err(e) = self.sync.sign_out().await {
                    self.report("sign-out", &e);
                }
                self.release_changes();
            }
            Command::Quit => return false,
        }
        true
    }

    fn report(&self, operation: &str, error: &anyhow::Error) {
        tracing::warn!(operation, error = %error, "Command failed");
    }

    /// Asks the identity service for the session, letting it refresh or
    /// expire tokens. Changes arrive through the session subscription.
    async fn check_session(&self) {
        if self.sync.snapshot().session().is_none() {
            return;
        }
        if let Err(e) = self.sync.backend().auth.current_session().await {
            tracing::debug!(error = %e, "Session check failed");
        }
    }

    /// Mounts the view and processes events until `Quit`, the command
    /// channel closes, or the session publisher goes away.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        self.mount().await?;

        let mut ticker = tokio::time::interval(self.options.session_check);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                change = next_session(&mut self.sessions) => match change {
                    Some(session) => self.handle_session_change(session).await,
                    None => {
                        tracing::warn!("Session publisher closed");
                        break;
                    }
                },
                event = next_change(&mut self.changes) => match event {
                    Some(event) => self.handle_change(event).await,
                    None => {
                        tracing::warn!("Change feed ended");
                        self.changes = None;
                    }
                },
                _ = ticker.tick() => self.check_session().await,
            }
        }

        self.unmount();
        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.release_changes();
    }
}

async fn next_session(sub: &mut Option<SessionSubscription>) -> Option<Option<Session>> {
    match sub {
        Some(sub) => sub.changed().await,
        None => std::future::pending().await,
    }
}

async fn next_change(sub: &mut Option<ChangeSubscription>) -> Option<ChangeEvent> {
    match sub {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}
