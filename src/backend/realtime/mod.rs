//! Table change feeds
//!
//! Two transports implement [`ChangeFeed`]:
//!
//! - [`PhoenixChangeFeed`] joins a `postgres_changes` channel on the
//!   project's realtime websocket (`/realtime/v1/websocket`). This is the
//!   endpoint a Supabase project serves, and the default.
//! - [`SseChangeFeed`] reads a Server-Sent Events relay at an explicit
//!   `realtime.url`.
//!
//! Each subscription runs one background task that reconnects after
//! `realtime.reconnect_delay_ms` until its guard is dropped.

use std::sync::Arc;

use crate::backend::{ChangeEvent, ChangeFeed, EventFilter, SessionCell};
use crate::config::{Config, RealtimeTransport};
use crate::error::{Result, SmartmarkError};

pub mod phoenix;
pub mod sse;

pub use phoenix::PhoenixChangeFeed;
pub use sse::SseChangeFeed;

/// Bound on undelivered events per subscription.
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Why a single connection attempt stopped.
pub(crate) enum StreamEnd {
    /// Connection closed or failed; try again after the delay
    Reconnect,
    /// Subscriber went away or cancelled
    Stop,
}

/// Client-side table and kind check applied to every decoded event.
pub(crate) fn wanted(event: &ChangeEvent, table: &str, filter: EventFilter) -> bool {
    event.table == table && filter.matches(event.kind)
}

/// Builds the change feed selected by `realtime.transport`.
///
/// # Errors
///
/// Returns [`SmartmarkError::Config`] if the endpoint is missing or invalid
/// for the chosen transport.
pub fn from_config(config: &Config, cell: SessionCell) -> Result<Arc<dyn ChangeFeed>> {
    match config.realtime.transport {
        RealtimeTransport::Websocket => Ok(Arc::new(PhoenixChangeFeed::new(config, cell)?)),
        RealtimeTransport::Sse => {
            // The event stream stays open indefinitely, so it gets a client
            // without the per-request timeout.
            let http = Arc::new(reqwest::Client::builder().build().map_err(|e| {
                SmartmarkError::Config(format!("failed to build HTTP client: {e}"))
            })?);
            Ok(Arc::new(SseChangeFeed::new(http, config, cell)?))
        }
    }
}
