//! Streaming renderers for both client dialects.
//!
//! The answer is re-chunked word by word from the aggregated text rather than
//! forwarded fragment by fragment, so clients see the same cadence whatever
//! fragment sizes the provider used. Each renderer goes through `start`, then
//! exactly one of `finish` or `fail`; later calls produce nothing.

use super::anthropic_types::{
    Delta, DeltaUsage, ErrorResponse, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChatError, ChunkChoice, ChunkDelta};
use super::response::{
    chat_completion_id, chat_usage, combine_text, estimate_usage, response_id,
    INPUT_TOKEN_ESTIMATE,
};
use crate::error::ProxyError;
use crate::provider::types::AggregatedResponse;

/// One outbound SSE frame. `event: None` writes a data-only frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

pub const DONE_SENTINEL: &str = "[DONE]";

/// Split on whitespace runs; every word after the first carries one leading space.
#[must_use]
pub fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .enumerate()
        .map(|(i, w)| if i == 0 { w.to_string() } else { format!(" {w}") })
        .collect()
}

/// Which wire shape a stream is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Anthropic,
    OpenAi,
}

/// Messages-API event sequence.
#[derive(Debug)]
pub struct AnthropicStream {
    id: String,
    model: String,
    started: bool,
    block_open: bool,
    finished: bool,
}

impl AnthropicStream {
    pub fn new(model: &str) -> Self {
        Self {
            id: response_id(),
            model: model.to_string(),
            started: false,
            block_open: false,
            finished: false,
        }
    }

    /// `message_start` plus the opening of the single text block.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.started || self.finished {
            return Vec::new();
        }
        self.started = true;
        self.block_open = true;
        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens: INPUT_TOKEN_ESTIMATE,
                        output_tokens: 0,
                    },
                    sider_session: None,
                },
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
        ]
    }

    /// Word deltas for the final answer, then the closing events.
    pub fn finish(&mut self, resp: &AggregatedResponse) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = self.start();
        let text = combine_text(resp);
        let usage = estimate_usage(resp, &text);

        events.extend(split_words(&text).into_iter().map(|word| StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::TextDelta { text: word },
        }));
        events.push(StreamEvent::ContentBlockStop { index: 0 });
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some("end_turn".to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: usage.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        self.block_open = false;
        self.finished = true;
        events
    }

    /// Close any open block and report the error. No `message_stop` follows.
    pub fn fail(&mut self, err: &ProxyError) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();
        if self.block_open {
            events.push(StreamEvent::ContentBlockStop { index: 0 });
            self.block_open = false;
        }
        events.push(StreamEvent::Error {
            error: ErrorResponse::from(err).error,
        });
        self.finished = true;
        events
    }
}

/// Chat Completions chunk sequence.
#[derive(Debug)]
pub struct OpenAiStream {
    id: String,
    model: String,
    created: i64,
    started: bool,
    finished: bool,
}

impl OpenAiStream {
    pub fn new(model: &str) -> Self {
        Self {
            id: chat_completion_id(&response_id()),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            started: false,
            finished: false,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage: None,
            error: None,
        }
    }

    /// The role-assigning first chunk.
    pub fn start(&mut self) -> Vec<ChatCompletionChunk> {
        if self.started || self.finished {
            return Vec::new();
        }
        self.started = true;
        vec![self.chunk(
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: None,
            },
            None,
        )]
    }

    /// Word chunks, then an empty-delta chunk with `finish_reason: "stop"` and usage.
    pub fn finish(&mut self, resp: &AggregatedResponse) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }
        let mut chunks = self.start();
        let text = combine_text(resp);
        let usage = estimate_usage(resp, &text);

        for word in split_words(&text) {
            chunks.push(self.chunk(
                ChunkDelta {
                    role: None,
                    content: Some(word),
                },
                None,
            ));
        }
        let mut last = self.chunk(ChunkDelta::default(), Some("stop"));
        last.usage = Some(chat_usage(usage));
        chunks.push(last);

        self.finished = true;
        chunks
    }

    pub fn fail(&mut self, err: &ProxyError) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }
        let mut chunk = self.chunk(ChunkDelta::default(), Some("error"));
        chunk.error = Some(ChatError::from(err));
        self.finished = true;
        vec![chunk]
    }
}

/// Either dialect's renderer, producing ready-to-send frames.
#[derive(Debug)]
pub enum StreamRenderer {
    Anthropic(AnthropicStream),
    OpenAi(OpenAiStream),
}

impl StreamRenderer {
    pub fn new(dialect: Dialect, model: &str) -> Self {
        match dialect {
            Dialect::Anthropic => Self::Anthropic(AnthropicStream::new(model)),
            Dialect::OpenAi => Self::OpenAi(OpenAiStream::new(model)),
        }
    }

    pub fn start(&mut self) -> Vec<SseEvent> {
        match self {
            Self::Anthropic(s) => anthropic_frames(s.start()),
            Self::OpenAi(s) => openai_frames(s.start(), false),
        }
    }

    pub fn finish(&mut self, resp: &AggregatedResponse) -> Vec<SseEvent> {
        match self {
            Self::Anthropic(s) => anthropic_frames(s.finish(resp)),
            Self::OpenAi(s) => openai_frames(s.finish(resp), true),
        }
    }

    pub fn fail(&mut self, err: &ProxyError) -> Vec<SseEvent> {
        match self {
            Self::Anthropic(s) => anthropic_frames(s.fail(err)),
            Self::OpenAi(s) => openai_frames(s.fail(err), true),
        }
    }
}

fn anthropic_frames(events: Vec<StreamEvent>) -> Vec<SseEvent> {
    events
        .into_iter()
        .filter_map(|event| {
            serde_json::to_string(&event).ok().map(|data| SseEvent {
                event: Some(event.event_name().to_string()),
                data,
            })
        })
        .collect()
}

/// Data-only frames; a terminal batch ends with the `[DONE]` sentinel.
fn openai_frames(chunks: Vec<ChatCompletionChunk>, terminal: bool) -> Vec<SseEvent> {
    let terminal = terminal && !chunks.is_empty();
    let mut frames: Vec<SseEvent> = chunks
        .iter()
        .filter_map(|chunk| serde_json::to_string(chunk).ok())
        .map(|data| SseEvent { event: None, data })
        .collect();
    if terminal {
        frames.push(SseEvent {
            event: None,
            data: DONE_SENTINEL.to_string(),
        });
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregated(text: &[&str]) -> AggregatedResponse {
        AggregatedResponse {
            text_parts: text.iter().map(|s| s.to_string()).collect(),
            ..AggregatedResponse::default()
        }
    }

    #[test]
    fn test_split_words_reconstructs_single_spaced_text() {
        assert_eq!(split_words("Hi there"), vec!["Hi", " there"]);
        assert_eq!(split_words("  a \n\t b   c "), vec!["a", " b", " c"]);
        assert!(split_words("").is_empty());
        assert!(split_words("   ").is_empty());

        let text = "The quick  brown\nfox";
        let joined: String = split_words(text).concat();
        assert_eq!(joined, "The quick brown fox");
        // re-chunking the reconstruction is stable
        assert_eq!(split_words(&joined).concat(), joined);
    }

    #[test]
    fn test_anthropic_sequence() {
        let mut s = AnthropicStream::new("claude-sonnet-4");
        let mut events = s.start();
        events.extend(s.finish(&aggregated(&["Hi", " there"])));

        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: Delta::TextDelta { text },
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hi there");

        match &events[0] {
            StreamEvent::MessageStart { message } => {
                assert!(message.id.starts_with("msg_"));
                assert_eq!(message.model, "claude-sonnet-4");
                assert!(message.content.is_empty());
            }
            other => panic!("unexpected first event: {other:?}"),
        }
        match &events[5] {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
                assert_eq!(usage.output_tokens, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(s.finish(&aggregated(&["again"])).is_empty());
        assert!(s.fail(&ProxyError::transport("late")).is_empty());
    }

    #[test]
    fn test_anthropic_failure_closes_block_without_stop() {
        let mut s = AnthropicStream::new("m");
        s.start();
        let events = s.fail(&ProxyError::transport("connection reset"));
        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(names, vec!["content_block_stop", "error"]);
        assert!(s.finish(&aggregated(&["x"])).is_empty());
    }

    #[test]
    fn test_openai_sequence() {
        let mut r = StreamRenderer::new(Dialect::OpenAi, "gpt-4o");
        let mut frames = r.start();
        frames.extend(r.finish(&aggregated(&["Hello", " world"])));

        assert!(frames.iter().all(|f| f.event.is_none()));
        assert_eq!(frames.len(), 5);
        assert_eq!(frames.last().unwrap().data, DONE_SENTINEL);

        let first: serde_json::Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert!(first["id"].as_str().unwrap().starts_with("chatcmpl-"));

        let second: serde_json::Value = serde_json::from_str(&frames[2].data).unwrap();
        assert_eq!(second["choices"][0]["delta"]["content"], " world");

        let last: serde_json::Value = serde_json::from_str(&frames[3].data).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(last["usage"]["prompt_tokens"], 10);

        assert!(r.finish(&aggregated(&["x"])).is_empty());
    }

    #[test]
    fn test_openai_failure_ends_with_done() {
        let mut r = StreamRenderer::new(Dialect::OpenAi, "m");
        r.start();
        let frames = r.fail(&ProxyError::transport("timeout"));
        assert_eq!(frames.len(), 2);
        let chunk: serde_json::Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(chunk["error"]["type"], "api_error");
        assert_eq!(frames[1].data, DONE_SENTINEL);
        assert!(r.fail(&ProxyError::transport("again")).is_empty());
    }

    #[test]
    fn test_renderer_frames_carry_event_names() {
        let mut r = StreamRenderer::new(Dialect::Anthropic, "m");
        let frames = r.start();
        assert_eq!(frames[0].event.as_deref(), Some("message_start"));
        assert_eq!(frames[1].event.as_deref(), Some("content_block_start"));
        assert!(r.start().is_empty());
    }
}
