//! Table change feed over Server-Sent Events
//!
//! For deployments that put an event-stream relay in front of the
//! database. A subscription opens `GET {endpoint}?table={table}&event={filter}` with
//! `Accept: text/event-stream` and decodes each `data:` payload as a
//! [`ChangeEvent`]. When the stream ends or fails, the task waits
//! `reconnect_delay` and reopens it, resuming with `Last-Event-ID`.
//!
//! Cancellation is cooperative: the subscription guard cancels the token,
//! and every await point in the task races against it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{wanted, StreamEnd, CHANNEL_CAPACITY};
use crate::backend::{
    bearer_token, ChangeEvent, ChangeFeed, ChangeSubscription, EventFilter, SessionCell,
};
use crate::config::Config;
use crate::error::{Result, SmartmarkError};

/// HTTP implementation of [`ChangeFeed`].
#[derive(Debug, Clone)]
pub struct SseChangeFeed {
    http: Arc<reqwest::Client>,
    endpoint: Url,
    anon_key: String,
    reconnect_delay: Duration,
    cell: SessionCell,
}

impl SseChangeFeed {
    /// Builds a feed for the realtime endpoint in `config`.
    pub fn new(http: Arc<reqwest::Client>, config: &Config, cell: SessionCell) -> Result<Self> {
        Self::for_endpoint(
            http,
            &config.realtime_endpoint()?,
            &config.backend.anon_key,
            Duration::from_millis(config.realtime.reconnect_delay_ms),
            cell,
        )
    }

    /// Builds a feed for an explicit endpoint.
    pub fn for_endpoint(
        http: Arc<reqwest::Client>,
        endpoint: &str,
        anon_key: &str,
        reconnect_delay: Duration,
        cell: SessionCell,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            SmartmarkError::Config(format!("invalid realtime endpoint {endpoint}: {e}"))
        })?;
        Ok(Self {
            http,
            endpoint,
            anon_key: anon_key.to_string(),
            reconnect_delay,
            cell,
        })
    }

    fn stream_url(&self, table: &str, filter: EventFilter) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("table", table)
            .append_pair("event", &filter.to_string());
        url
    }
}

#[async_trait::async_trait]
impl ChangeFeed for SseChangeFeed {
    async fn subscribe(&self, table: &str, filter: EventFilter) -> Result<ChangeSubscription> {
        if table.trim().is_empty() {
            return Err(SmartmarkError::Realtime("cannot subscribe without a table".to_string()).into());
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = FeedWorker {
            feed: self.clone(),
            url: self.stream_url(table, filter),
            table: table.to_string(),
            filter,
            tx,
            cancel: cancel.clone(),
            last_event_id: None,
        };
        tracing::debug!(table, %filter, "Opening change feed");
        let task = tokio::spawn(worker.run());

        Ok(ChangeSubscription::new(rx, cancel, Some(task)))
    }
}

struct FeedWorker {
    feed: SseChangeFeed,
    url: Url,
    table: String,
    filter: EventFilter,
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
    last_event_id: Option<String>,
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

    async fn connect_once(&mut self) -> StreamEnd {
        let mut request = self
            .feed
            .http
            .get(self.url.clone())
            .header("apikey", &self.feed.anon_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .bearer_auth(bearer_token(&self.feed.cell, &self.feed.anon_key));
        if let Some(ref id) = self.last_event_id {
            request = request.header("Last-Event-ID", id);
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return StreamEnd::Stop,
            r = request.send() => r,
        };

        match response {
            Ok(resp) if resp.status().is_success() => {
                let end = self.consume(resp.bytes_stream()).await;
                if let StreamEnd::Reconnect = end {
                    tracing::debug!(table = %self.table, "Change stream ended; reconnecting");
                }
                end
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "Change feed rejected subscription");
                StreamEnd::Reconnect
            }
            Err(e) => {
                tracing::warn!(error = %e, "Change feed connection failed");
                StreamEnd::Reconnect
            }
        }
    }

    async fn consume(
        &mut self,
        byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    ) -> StreamEnd {
        let mut parser = SseParser::default();
        tokio::pin!(byte_stream);

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return StreamEnd::Stop,
                c = byte_stream.next() => c,
            };
            let (frames, ended) = match chunk {
                Some(Ok(bytes)) => (parser.push(&bytes), false),
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Change stream read failed");
                    (parser.finish(), true)
                }
                None => (parser.finish(), true),
            };

            for frame in frames {
                if let Some(id) = frame.id.clone() {
                    self.last_event_id = Some(id);
                }
                let Some(event) = decode_frame(&frame, &self.table, self.filter) else {
                    continue;
                };
                if self.tx.send(event).await.is_err() {
                    return StreamEnd::Stop;
                }
            }

            if ended {
                return StreamEnd::Reconnect;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `id:` field, if present
    pub id: Option<String>,
    /// `event:` field, if present
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseFrame {
    /// Keep-alive frames: `event: ping` or `data: [PING]`.
    pub fn is_ping(&self) -> bool {
        self.event
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("ping"))
            || self.data.eq_ignore_ascii_case("[ping]")
    }
}

/// Incremental SSE decoder.
///
/// Bytes are buffered until a blank line closes an event block. A chunk
/// boundary may fall anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feeds a chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some((pos, sep_len)) = find_block_end(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + sep_len).take(pos).collect();
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing event that was not closed by a blank line.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            return Vec::new();
        }
        parse_block(&text).into_iter().collect()
    }
}

fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "id" => frame.id = Some(value.to_string()),
            "event" => frame.event = Some(value.to_string()),
            // retry: reconnect timing comes from configuration
            _ => {}
        }
    }

    frame.data = data_lines.join("\n");
    if frame.data.is_empty() && frame.id.is_none() && frame.event.is_none() {
        return None;
    }
    Some(frame)
}

/// Turns a frame into a change event for `table`, or `None` when it is a
/// keep-alive, malformed, or filtered out.
fn decode_frame(frame: &SseFrame, table: &str, filter: EventFilter) -> Option<ChangeEvent> {
    if frame.is_ping() || frame.data.is_empty() {
        return None;
    }
    let event: ChangeEvent = match serde_json::from_str(&frame.data) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed change event");
            return None;
        }
    };
    if !wanted(&event, table, filter) {
        return None;
    }
    tracing::trace!(kind = %event.kind, table = %event.table, "Change event");
    Some(event)
}
