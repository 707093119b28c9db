//! Table change feed over the realtime websocket
//!
//! The socket speaks the Phoenix channel protocol with JSON object frames
//! (`vsn=1.0.0`):
//!
//! 1. connect to `{endpoint}?apikey=<anon key>&vsn=1.0.0`
//! 2. send `phx_join` on `realtime:<table>-channel`, asking for
//!    `postgres_changes` on the table and carrying the bearer token
//! 3. forward every `postgres_changes` push that passes the filter
//! 4. send a `heartbeat` on the `phoenix` topic every 25 seconds
//!
//! A rejected join, a channel error, or a closed socket ends the
//! connection. The task then waits `reconnect_delay` and joins again.

use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{wanted, StreamEnd, CHANNEL_CAPACITY};
use crate::backend::{
    bearer_token, ChangeEvent, ChangeFeed, ChangeSubscription, EventFilter, SessionCell,
};
use crate::config::Config;
use crate::error::{Result, SmartmarkError};

const PROTOCOL_VERSION: &str = "1.0.0";
const HEARTBEAT_TOPIC: &str = "phoenix";
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);
const SCHEMA: &str = "public";

/// One frame of the channel protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    /// Channel topic, or `phoenix` for socket-level messages
    pub topic: String,
    /// `phx_join`, `phx_reply`, `postgres_changes`, `heartbeat`, ...
    pub event: String,
    /// Event-specific body
    #[serde(default)]
    pub payload: Value,
    /// Client-chosen reference echoed in the matching reply
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    /// Reference of the join this message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    fn join(topic: &str, reference: &str, payload: Value) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload,
            reference: Some(reference.to_string()),
            join_ref: Some(reference.to_string()),
        }
    }

    fn heartbeat(reference: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    fn status(&self) -> &str {
        self.payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Channel topic used for `table`.
pub fn channel_topic(table: &str) -> String {
    format!("realtime:{table}-channel")
}

/// Join payload asking for row changes on `table`.
pub fn join_payload(table: &str, filter: EventFilter, access_token: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": filter.to_string(), "schema": SCHEMA, "table": table }
            ],
            "private": false
        },
        "access_token": access_token
    })
}

/// Websocket implementation of [`ChangeFeed`].
#[derive(Debug, Clone)]
pub struct PhoenixChangeFeed {
    endpoint: Url,
    anon_key: String,
    reconnect_delay: Duration,
    heartbeat: Duration,
    cell: SessionCell,
}

impl PhoenixChangeFeed {
    /// Builds a feed for the realtime endpoint in `config`.
    pub fn new(config: &Config, cell: SessionCell) -> Result<Self> {
        Self::for_endpoint(
            &config.realtime_endpoint()?,
            &config.backend.anon_key,
            Duration::from_millis(config.realtime.reconnect_delay_ms),
            cell,
        )
    }

    /// Builds a feed for an explicit `ws://` or `wss://` endpoint.
    pub fn for_endpoint(
        endpoint: &str,
        anon_key: &str,
        reconnect_delay: Duration,
        cell: SessionCell,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            SmartmarkError::Config(format!("invalid realtime endpoint {endpoint}: {e}"))
        })?;
        if endpoint.scheme() != "ws" && endpoint.scheme() != "wss" {
            return Err(SmartmarkError::Config(format!(
                "realtime websocket endpoint must use ws or wss, got {}",
                endpoint.scheme()
            ))
            .into());
        }
        Ok(Self {
            endpoint,
            anon_key: anon_key.to_string(),
            reconnect_delay,
            heartbeat: DEFAULT_HEARTBEAT,
            cell,
        })
    }

    /// Overrides the heartbeat period.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    fn socket_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", PROTOCOL_VERSION);
        url
    }
}

#[async_trait::async_trait]
impl ChangeFeed for PhoenixChangeFeed {
    async fn subscribe(&self, table: &str, filter: EventFilter) -> Result<ChangeSubscription> {
        if table.trim().is_empty() {
            return Err(
                SmartmarkError::Realtime("cannot subscribe without a table".to_string()).into(),
            );
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = FeedWorker {
            feed: self.clone(),
            topic: channel_topic(table),
            table: table.to_string(),
            filter,
            tx,
            cancel: cancel.clone(),
            last_ref: 0,
        };
        tracing::debug!(table, %filter, "Joining change channel");
        let task = tokio::spawn(worker.run());

        Ok(ChangeSubscription::new(rx, cancel, Some(task)))
    }
}

/// What woke the connection loop.
enum Wake {
    Cancelled,
    Heartbeat,
    Frame(Option<std::result::Result<Message, tungstenite::Error>>),
}

struct FeedWorker {
    feed: PhoenixChangeFeed,
    topic: String,
    table: String,
    filter: EventFilter,
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
    last_ref: u64,
}

impl FeedWorker {
    async fn run(mut self) {
        loop {
            if let StreamEnd::Stop = self.connect_once().await {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.feed.reconnect_delay) => {}
            }
        }
        tracing::debug!(table = %self.table, "Change feed closed");
    }

    fn next_ref(&mut self) -> String {
        self.last_ref += 1;
        self.last_ref.to_string()
    }

    async fn connect_once(&mut self) -> StreamEnd {
        let url = self.feed.socket_url();
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return StreamEnd::Stop,
            c = tokio_tungstenite::connect_async(url.as_str()) => c,
        };
        let socket = match connected {
            Ok((socket, _response)) => socket,
            Err(e) => {
                tracing::warn!(error = %e, "Change feed connection failed");
                return StreamEnd::Reconnect;
            }
        };
        let (mut sink, mut frames) = socket.split();

        // The token is read at join time, so a fresh join picks up a
        // refreshed session.
        let join_ref = self.next_ref();
        let token = bearer_token(&self.feed.cell, &self.feed.anon_key);
        let join = PhoenixMessage::join(
            &self.topic,
            &join_ref,
            join_payload(&self.table, self.filter, &token),
        );
        if let Err(e) = send(&mut sink, &join).await {
            tracing::warn!(error = %e, "Could not join change channel");
            return StreamEnd::Reconnect;
        }

        let period = self.feed.heartbeat;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                _ = self.cancel.cancelled() => Wake::Cancelled,
                _ = heartbeat.tick() => Wake::Heartbeat,
                frame = frames.next() => Wake::Frame(frame),
            };

            let text = match wake {
                Wake::Cancelled => return StreamEnd::Stop,
                Wake::Heartbeat => {
                    let beat = PhoenixMessage::heartbeat(&self.next_ref());
                    if let Err(e) = send(&mut sink, &beat).await {
                        tracing::debug!(error = %e, "Heartbeat failed");
                        return StreamEnd::Reconnect;
                    }
                    continue;
                }
                Wake::Frame(Some(Ok(Message::Text(text)))) => text,
                Wake::Frame(Some(Ok(Message::Close(_)))) | Wake::Frame(None) => {
                    tracing::debug!(table = %self.table, "Change socket closed; reconnecting");
                    return StreamEnd::Reconnect;
                }
                Wake::Frame(Some(Ok(_))) => continue,
                Wake::Frame(Some(Err(e))) => {
                    tracing::debug!(error = %e, "Change socket read failed");
                    return StreamEnd::Reconnect;
                }
            };

            if let Some(end) = self.handle_text(&text, &join_ref).await {
                return end;
            }
        }
    }

    /// Handles one text frame; `Some` ends the connection.
    async fn handle_text(&mut self, text: &str, join_ref: &str) -> Option<StreamEnd> {
        let message: PhoenixMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed realtime frame");
                return None;
            }
        };
        if message.topic != self.topic {
            return None;
        }

        match message.event.as_str() {
            "phx_reply" if message.reference.as_deref() == Some(join_ref) => {
                if message.status() == "ok" {
                    tracing::debug!(topic = %self.topic, "Joined change channel");
                    None
                } else {
                    tracing::warn!(
                        response = %message.payload,
                        "Change feed rejected subscription"
                    );
                    Some(StreamEnd::Reconnect)
                }
            }
            "postgres_changes" => {
                let data = message.payload.get("data").cloned().unwrap_or(Value::Null);
                let event: ChangeEvent = match serde_json::from_value(data) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed change event");
                        return None;
                    }
                };
                if !wanted(&event, &self.table, self.filter) {
                    return None;
                }
                tracing::trace!(kind = %event.kind, table = %event.table, "Change event");
                if self.tx.send(event).await.is_err() {
                    return Some(StreamEnd::Stop);
                }
                None
            }
            "system" if message.status() == "error" => {
                tracing::warn!(payload = %message.payload, "Realtime service reported an error");
                Some(StreamEnd::Reconnect)
            }
            "phx_error" | "phx_close" => {
                tracing::debug!(event = %message.event, "Change channel closed by server");
                Some(StreamEnd::Reconnect)
            }
            _ => None,
        }
    }
}

async fn send<S>(sink: &mut S, message: &PhoenixMessage) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(message)?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| SmartmarkError::Realtime(e.to_string()))?;
    Ok(())
}
