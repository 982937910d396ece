use crate::error::{ProxyError, Result};
use crate::provider::aggregate::Applied;
use crate::provider::client::{ExchangeUpdate, ProviderClient};
use crate::provider::types::{AggregatedResponse, ProviderRequest};
use crate::session::ContinuityHints;
use crate::translate::anthropic_types::MessagesRequest;
use crate::translate::request::{has_assistant_turn, translate, validate};
use crate::translate::response::{continuity_headers, session_headers};
use crate::translate::streaming::{Dialect, SseEvent, StreamRenderer};

use futures::stream::{self, Stream};
use futures::StreamExt;
use std::pin::Pin;
use tracing::{debug, info, trace, warn};

/// Outbound SSE frames for one streaming request.
pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// Continuity inputs taken from the caller's query string and headers.
#[derive(Debug, Clone, Default)]
pub struct CallerContinuity {
    pub conversation_id: Option<String>,
    pub parent_message_id: Option<String>,
}

/// A finished exchange plus the continuity headers to send with it.
#[derive(Debug)]
pub struct Completed {
    pub response: AggregatedResponse,
    pub headers: Vec<(&'static str, String)>,
}

/// A streaming reply: headers are known before the first frame is sent.
pub struct Streaming {
    pub headers: Vec<(&'static str, String)>,
    pub frames: SseStream,
}

/// Validate, resolve continuity against the tracker, and translate.
/// No network call happens when this fails.
///
/// # Errors
/// Returns `ProxyError::Validation` for malformed requests.
pub fn prepare(
    client: &ProviderClient,
    req: &MessagesRequest,
    continuity: &CallerContinuity,
) -> Result<(ProviderRequest, ContinuityHints)> {
    validate(req)?;
    let hints = client.sessions().resolve(
        continuity.conversation_id.as_deref(),
        continuity.parent_message_id.as_deref(),
        has_assistant_turn(req),
    );
    let provider_req = translate(req, &hints)?;
    debug!(
        session_key = %hints.session_key,
        cid = %hints.conversation_id,
        parent = %hints.parent_message_id,
        "Resolved continuity"
    );
    Ok((provider_req, hints))
}

/// Run one exchange to completion.
///
/// # Errors
/// Validation errors before any network call; transport, upstream and
/// protocol errors from the exchange. Partial results are discarded.
pub async fn proxy_buffered(
    client: &ProviderClient,
    req: &MessagesRequest,
    credential: &str,
    continuity: &CallerContinuity,
) -> Result<Completed> {
    let (provider_req, hints) = prepare(client, req, continuity)?;

    let response = client
        .exchange(&provider_req, credential, &hints.session_key)
        .await?;

    info!(
        model = %req.model,
        cid = %response.conversation_id,
        text_chars = response.text().len(),
        "Completed"
    );

    let headers = session_headers(&response);
    Ok(Completed { response, headers })
}

/// Open an exchange and return the frames to stream back.
///
/// Failures up to the first provider update (validation, connect, status,
/// content type) are returned as errors so the caller can answer with a
/// plain HTTP error. Later failures terminate the frame stream instead.
///
/// # Errors
/// Same kinds as [`proxy_buffered`], limited to the opening phase.
pub async fn proxy_streaming(
    client: &ProviderClient,
    req: &MessagesRequest,
    dialect: Dialect,
    credential: &str,
    continuity: &CallerContinuity,
) -> Result<Streaming> {
    let (provider_req, hints) = prepare(client, req, continuity)?;

    let mut updates = client
        .exchange_updates(&provider_req, credential, &hints.session_key)
        .await?;

    // Hold updates back until the provider names the conversation, so the
    // continuity headers can go out with the response head.
    let mut held: Vec<Result<ExchangeUpdate>> = Vec::new();
    let mut headers = Vec::new();
    while let Some(update) = updates.next().await {
        let update = update?;
        let known = match &update {
            ExchangeUpdate::Event {
                event,
                applied: Applied::SessionStarted,
            } => {
                if let Some(start) = &event.data.message_start {
                    headers = continuity_headers(&start.cid, Some(&start.message_ids()));
                }
                true
            }
            ExchangeUpdate::Event { .. } => false,
            ExchangeUpdate::Done(resp) => {
                headers = session_headers(resp);
                true
            }
        };
        held.push(Ok(update));
        if known {
            break;
        }
    }

    let updates = stream::iter(held).chain(updates);
    let model = req.model.clone();

    let frames = async_stream::stream! {
        let mut renderer = StreamRenderer::new(dialect, &model);
        for frame in renderer.start() {
            yield frame;
        }

        tokio::pin!(updates);
        let mut completed = None;
        while let Some(update) = updates.next().await {
            match update {
                Ok(ExchangeUpdate::Event { event, applied }) => {
                    trace!(kind = %event.data.event_type, ?applied, "progress");
                }
                Ok(ExchangeUpdate::Done(resp)) => {
                    completed = Some(resp);
                    break;
                }
                Err(e) => {
                    warn!("Stream aborted: {}", e);
                    for frame in renderer.fail(&e) {
                        yield frame;
                    }
                    return;
                }
            }
        }

        match completed {
            Some(resp) => {
                info!(model = %model, cid = %resp.conversation_id, "Stream completed");
                for frame in renderer.finish(&resp) {
                    yield frame;
                }
            }
            None => {
                let err = ProxyError::transport("provider stream ended without completing");
                for frame in renderer.fail(&err) {
                    yield frame;
                }
            }
        }
    };

    Ok(Streaming {
        headers,
        frames: Box::pin(frames),
    })
}
