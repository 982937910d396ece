//! HTTP/SSE exchange with the provider.
//!
//! [`ProviderClient::exchange_updates`] posts a [`ProviderRequest`] and
//! returns a stream that yields one [`ExchangeUpdate::Event`] per decoded SSE
//! event and a final [`ExchangeUpdate::Done`] carrying the aggregate. The
//! stream is pull-driven: nothing is read from the connection until the
//! consumer asks, and dropping it aborts the read.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use super::aggregate::{Aggregator, Applied};
use super::types::{AggregatedResponse, ConversationHistory, HistoryEnvelope, ProviderEvent, ProviderRequest};
use crate::config::ProxyConfig;
use crate::error::{truncate, ProxyError, Result, UPSTREAM_BODY_LIMIT};
use crate::session::SessionTracker;

// Client identity the provider expects. Values must match byte for byte.
pub const ORIGIN: &str = "chrome-extension://dhoenijjpgpeimemopealfcbiecgceod";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36 Edg/139.0.0.0";
pub const TIME_ZONE: &str = "Asia/Shanghai";
pub const APP_VERSION: &str = "5.13.0";
pub const APP_NAME: &str = "ChitChat_Edge_Ext";

const EVENT_STREAM: &str = "text/event-stream";
const DONE_SENTINEL: &str = "[DONE]";

/// Progress of one exchange.
#[derive(Debug, Clone)]
pub enum ExchangeUpdate {
    /// An event was folded into the aggregate.
    Event { event: ProviderEvent, applied: Applied },
    /// The stream ended normally.
    Done(AggregatedResponse),
}

pub type UpdateStream = Pin<Box<dyn Stream<Item = Result<ExchangeUpdate>> + Send>>;

#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    conversation_url: String,
    chat_timeout: Duration,
    conversation_timeout: Duration,
    sessions: Arc<SessionTracker>,
}

impl ProviderClient {
    pub fn new(http: reqwest::Client, config: &ProxyConfig, sessions: Arc<SessionTracker>) -> Self {
        Self {
            http,
            base_url: config.provider.base_url.clone(),
            conversation_url: config.provider.conversation_url.clone(),
            chat_timeout: config.chat_timeout(),
            conversation_timeout: config.conversation_timeout(),
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    /// Run one exchange to completion and return the final aggregate.
    ///
    /// `session_key` is the client-visible conversation id the exchange is
    /// tracked under (empty when the request named none).
    pub async fn exchange(
        &self,
        req: &ProviderRequest,
        credential: &str,
        session_key: &str,
    ) -> Result<AggregatedResponse> {
        self.exchange_with_progress(req, credential, session_key, |_, _| {})
            .await
    }

    /// Like [`exchange`](Self::exchange), calling `on_event` after every
    /// applied event with the in-progress aggregate.
    pub async fn exchange_with_progress<F>(
        &self,
        req: &ProviderRequest,
        credential: &str,
        session_key: &str,
        mut on_event: F,
    ) -> Result<AggregatedResponse>
    where
        F: FnMut(&ProviderEvent, &AggregatedResponse),
    {
        let events = self.open(req, credential).await?;
        tokio::pin!(events);

        let mut aggregator = self.aggregator(session_key);
        while let Some(event) = events.next().await {
            let event = event?;
            aggregator.apply(&event);
            on_event(&event, aggregator.response());
        }
        Ok(finish(aggregator))
    }

    /// Open the exchange and hand back its update stream.
    ///
    /// Status and content-type failures are reported here, before any update
    /// is produced. The chat timeout bounds everything from connect to the
    /// last byte of the stream.
    pub async fn exchange_updates(
        &self,
        req: &ProviderRequest,
        credential: &str,
        session_key: &str,
    ) -> Result<UpdateStream> {
        let events = self.open(req, credential).await?;
        Ok(Box::pin(fold_updates(events, self.aggregator(session_key))))
    }

    fn aggregator(&self, session_key: &str) -> Aggregator {
        Aggregator::new().with_tracker(self.sessions.clone(), session_key)
    }

    /// POST the chat request and return its decoded event stream.
    async fn open(
        &self,
        req: &ProviderRequest,
        credential: &str,
    ) -> Result<impl Stream<Item = Result<ProviderEvent>> + Send + 'static> {
        let deadline = Instant::now() + self.chat_timeout;

        info!(
            url = %self.base_url,
            model = %req.model,
            cid = %req.cid,
            parent = %req.parent_message_id,
            "POST provider chat"
        );

        let response = timeout_at(deadline, self.post(&self.base_url, credential).json(req).send())
            .await
            .map_err(|_| timed_out(self.chat_timeout))?
            .map_err(|e| ProxyError::transport(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response, deadline).await;
            warn!(status = status.as_u16(), "Provider rejected chat request");
            return Err(ProxyError::upstream(status.as_u16(), &body));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains(EVENT_STREAM) {
            return Err(ProxyError::protocol(format!(
                "expected {EVENT_STREAM} response, got '{content_type}'"
            )));
        }

        Ok(provider_events(response.bytes_stream(), deadline, self.chat_timeout))
    }

    /// Fetch a provider conversation transcript, bounded by the shorter history timeout.
    pub async fn fetch_conversation_history(
        &self,
        cid: &str,
        credential: &str,
        limit: u32,
    ) -> Result<ConversationHistory> {
        let deadline = Instant::now() + self.conversation_timeout;
        let body = serde_json::json!({ "cid": cid, "limit": limit });

        let response = self
            .post(&self.conversation_url, credential)
            .timeout(self.conversation_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError::transport(format!("History request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response, deadline).await;
            return Err(ProxyError::upstream(status.as_u16(), &body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::transport(format!("Failed to read history response: {e}")))?;

        let envelope: HistoryEnvelope = serde_json::from_str(&text)
            .map_err(|e| ProxyError::protocol(format!("Failed to parse history response: {e}")))?;
        if envelope.code != 0 {
            return Err(ProxyError::upstream(
                status.as_u16(),
                &format!("conversation history error: {}", envelope.msg),
            ));
        }

        debug!(cid, messages = envelope.data.messages.len(), "Fetched conversation history");
        Ok(envelope.data)
    }

    fn post(&self, url: &str, credential: &str) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {credential}"))
            .header("Origin", ORIGIN)
            .header("User-Agent", USER_AGENT)
            .header("X-Time-Zone", TIME_ZONE)
            .header("X-App-Version", APP_VERSION)
            .header("X-App-Name", APP_NAME)
    }
}

fn finish(aggregator: Aggregator) -> AggregatedResponse {
    let response = aggregator.into_response();
    info!(
        cid = %response.conversation_id,
        text_parts = response.text_parts.len(),
        tools = response.tool_results.len(),
        "Provider stream completed"
    );
    response
}

/// At most [`UPSTREAM_BODY_LIMIT`] bytes of a failed response's body.
async fn read_error_body(response: reqwest::Response, deadline: Instant) -> String {
    let mut body = Vec::new();
    let mut chunks = response.bytes_stream();
    while body.len() < UPSTREAM_BODY_LIMIT {
        match timeout_at(deadline, chunks.next()).await {
            Ok(Some(Ok(chunk))) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    let body = String::from_utf8_lossy(&body);
    truncate(&body, UPSTREAM_BODY_LIMIT).to_string()
}

fn timed_out(limit: Duration) -> ProxyError {
    ProxyError::transport(format!("provider exchange timed out after {}s", limit.as_secs()))
}

/// Fold decoded events into `aggregator`, ending with [`ExchangeUpdate::Done`].
/// An error ends the stream without a `Done`.
fn fold_updates(
    events: impl Stream<Item = Result<ProviderEvent>> + Send + 'static,
    mut aggregator: Aggregator,
) -> impl Stream<Item = Result<ExchangeUpdate>> + Send + 'static {
    async_stream::stream! {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    let applied = aggregator.apply(&event);
                    yield Ok(ExchangeUpdate::Event { event, applied });
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        yield Ok(ExchangeUpdate::Done(finish(aggregator)));
    }
}

/// Decode the SSE body into provider events until `[DONE]` or end of body.
///
/// Undecodable payloads are logged and skipped. Every read is bounded by
/// `deadline`.
fn provider_events(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
    deadline: Instant,
    limit: Duration,
) -> impl Stream<Item = Result<ProviderEvent>> + Send + 'static {
    async_stream::stream! {
        let sse = byte_stream.eventsource();
        tokio::pin!(sse);
        let mut count = 0usize;

        'read: loop {
            let sse_event = match timeout_at(deadline, sse.next()).await {
                Err(_) => {
                    yield Err(timed_out(limit));
                    return;
                }
                Ok(None) => break,
                Ok(Some(Ok(sse_event))) => sse_event,
                Ok(Some(Err(e))) => {
                    yield Err(ProxyError::transport(format!("Failed to read provider stream: {e}")));
                    return;
                }
            };

            // consecutive data lines without a blank line arrive as one event
            for line in sse_event.data.lines() {
                match decode_data(line) {
                    Ok(Some(event)) => {
                        count += 1;
                        trace!(kind = %event.data.event_type, code = event.code, "provider event");
                        yield Ok(event);
                    }
                    Ok(None) => break 'read,
                    Err(e) => debug!("Skipping provider event: {}", e),
                }
            }
        }
        debug!(events = count, "Provider stream drained");
    }
}

/// Decode one `data:` payload. `Ok(None)` marks the end-of-stream sentinel.
fn decode_data(data: &str) -> Result<Option<ProviderEvent>> {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(None);
    }
    serde_json::from_str(data)
        .map(Some)
        .map_err(|e| ProxyError::decode(format!("{e}: {}", truncate(data, 200))))
}
