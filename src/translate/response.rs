//! Render an aggregated provider exchange as a buffered response.

use super::anthropic_types::{MessagesResponse, ResponseContentBlock, SessionInfo, Usage};
use super::openai_types::{ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage};
use crate::provider::types::{AggregatedResponse, MessageIds};

pub const NO_CONTENT_PLACEHOLDER: &str = "Response received but no text content was generated.";
/// Fixed input-token figure; no tokenizer is run.
pub const INPUT_TOKEN_ESTIMATE: u64 = 10;

pub const HEADER_CONVERSATION_ID: &str = "X-Conversation-ID";
pub const HEADER_ASSISTANT_MESSAGE_ID: &str = "X-Assistant-Message-ID";
pub const HEADER_USER_MESSAGE_ID: &str = "X-User-Message-ID";

/// Answer text, preceded by a `<think>` block when the provider reasoned.
#[must_use]
pub fn combine_text(resp: &AggregatedResponse) -> String {
    let reasoning = resp.reasoning();
    let reasoning = reasoning.trim();
    let text = resp.text();
    let text = text.trim();

    let combined = if reasoning.is_empty() {
        text.to_string()
    } else {
        format!("<think>\n{reasoning}\n</think>\n\n{text}")
    };

    if combined.is_empty() {
        NO_CONTENT_PLACEHOLDER.to_string()
    } else {
        combined
    }
}

/// Approximate usage at four characters per token.
#[must_use]
pub fn estimate_usage(resp: &AggregatedResponse, combined: &str) -> Usage {
    let output = combined.chars().count().div_ceil(4);
    let reasoning = resp.reasoning().chars().count().div_ceil(4);
    Usage {
        input_tokens: INPUT_TOKEN_ESTIMATE,
        output_tokens: (output + reasoning) as u64,
    }
}

/// Fresh `msg_<unix millis>_<6 digits>` id.
#[must_use]
pub fn response_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().as_u128() % 1_000_000;
    format!("msg_{millis}_{random:06}")
}

/// Rewrite a Messages-style id into the Chat Completions `chatcmpl-` convention.
#[must_use]
pub fn chat_completion_id(id: &str) -> String {
    if let Some(rest) = id.strip_prefix("msg_") {
        format!("chatcmpl-{rest}")
    } else if id.starts_with("chatcmpl-") {
        id.to_string()
    } else {
        format!("chatcmpl-{id}")
    }
}

/// Continuity side channel, present once the provider assigned a conversation.
#[must_use]
pub fn session_info(resp: &AggregatedResponse) -> Option<SessionInfo> {
    if resp.conversation_id.is_empty() {
        return None;
    }
    Some(SessionInfo {
        conversation_id: resp.conversation_id.clone(),
        message_ids: resp.message_ids.clone(),
        tool_results: resp.tool_results.clone(),
        reasoning_parts: resp.reasoning_parts.clone(),
    })
}

/// Response headers that let a caller continue the provider conversation.
#[must_use]
pub fn session_headers(resp: &AggregatedResponse) -> Vec<(&'static str, String)> {
    continuity_headers(&resp.conversation_id, resp.message_ids.as_ref())
}

/// Continuity headers for a conversation id and its latest message ids.
#[must_use]
pub fn continuity_headers(cid: &str, ids: Option<&MessageIds>) -> Vec<(&'static str, String)> {
    let mut headers = Vec::new();
    if cid.is_empty() {
        return headers;
    }
    headers.push((HEADER_CONVERSATION_ID, cid.to_string()));
    if let Some(ids) = ids {
        if !ids.assistant.is_empty() {
            headers.push((HEADER_ASSISTANT_MESSAGE_ID, ids.assistant.clone()));
        }
        if !ids.user.is_empty() {
            headers.push((HEADER_USER_MESSAGE_ID, ids.user.clone()));
        }
    }
    headers
}

/// Render as a Messages response. `model` is the name the client asked for.
#[must_use]
pub fn render_anthropic(resp: &AggregatedResponse, model: &str) -> MessagesResponse {
    let text = combine_text(resp);
    let usage = estimate_usage(resp, &text);

    MessagesResponse {
        id: response_id(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ResponseContentBlock::Text { text }],
        model: model.to_string(),
        stop_reason: Some("end_turn".to_string()),
        stop_sequence: None,
        usage,
        sider_session: session_info(resp),
    }
}

/// Render as a Chat Completions response.
#[must_use]
pub fn render_openai(resp: &AggregatedResponse, model: &str) -> ChatCompletionResponse {
    anthropic_to_openai(render_anthropic(resp, model))
}

/// Reshape a rendered Messages response into the Chat Completions form.
#[must_use]
pub fn anthropic_to_openai(resp: MessagesResponse) -> ChatCompletionResponse {
    let content = resp
        .content
        .iter()
        .map(|b| match b {
            ResponseContentBlock::Text { text } => text.as_str(),
        })
        .collect::<String>();

    ChatCompletionResponse {
        id: chat_completion_id(&resp.id),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: resp.model,
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: Some(map_stop_reason(resp.stop_reason.as_deref().unwrap_or("end_turn"))),
            logprobs: None,
        }],
        usage: chat_usage(resp.usage),
        sider_session: resp.sider_session,
    }
}

#[must_use]
pub fn chat_usage(usage: Usage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

/// Map a Messages `stop_reason` to a Chat Completions `finish_reason`.
#[must_use]
pub fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregated(reasoning: &[&str], text: &[&str]) -> AggregatedResponse {
        AggregatedResponse {
            reasoning_parts: reasoning.iter().map(|s| s.to_string()).collect(),
            text_parts: text.iter().map(|s| s.to_string()).collect(),
            model: "claude-4-sonnet-think".to_string(),
            ..AggregatedResponse::default()
        }
    }

    #[test]
    fn test_combine_plain_text() {
        assert_eq!(combine_text(&aggregated(&[], &["Hi", " there"])), "Hi there");
    }

    #[test]
    fn test_combine_wraps_reasoning() {
        let resp = aggregated(&["  pondering "], &["answer"]);
        assert_eq!(combine_text(&resp), "<think>\npondering\n</think>\n\nanswer");
    }

    #[test]
    fn test_combine_placeholder_when_empty() {
        assert_eq!(combine_text(&aggregated(&[], &[" "])), NO_CONTENT_PLACEHOLDER);
    }

    #[test]
    fn test_usage_estimate() {
        let resp = aggregated(&["abcde"], &["x"]);
        let usage = estimate_usage(&resp, "abcdefghi");
        assert_eq!(usage.input_tokens, 10);
        // ceil(9/4) + ceil(5/4)
        assert_eq!(usage.output_tokens, 3 + 2);
    }

    #[test]
    fn test_response_ids() {
        let id = response_id();
        let rest = id.strip_prefix("msg_").unwrap();
        let (millis, random) = rest.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(random.len(), 6);
        assert_eq!(chat_completion_id(&id), format!("chatcmpl-{rest}"));
        assert_eq!(chat_completion_id("chatcmpl-x"), "chatcmpl-x");
        assert_eq!(chat_completion_id("abc"), "chatcmpl-abc");
    }

    #[test]
    fn test_render_anthropic_end_to_end() {
        let mut resp = aggregated(&[], &["Hi", " there"]);
        resp.conversation_id = "c1".to_string();
        resp.message_ids = Some(MessageIds {
            user: "u1".to_string(),
            assistant: "a1".to_string(),
        });

        let out = render_anthropic(&resp, "claude-sonnet-4");
        assert_eq!(out.model, "claude-sonnet-4");
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        let ResponseContentBlock::Text { text } = &out.content[0];
        assert_eq!(text, "Hi there");
        assert_eq!(out.sider_session.unwrap().conversation_id, "c1");

        let headers = session_headers(&resp);
        assert_eq!(
            headers,
            vec![
                (HEADER_CONVERSATION_ID, "c1".to_string()),
                (HEADER_ASSISTANT_MESSAGE_ID, "a1".to_string()),
                (HEADER_USER_MESSAGE_ID, "u1".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_session_without_conversation() {
        let resp = aggregated(&[], &["x"]);
        assert!(session_info(&resp).is_none());
        assert!(session_headers(&resp).is_empty());
    }

    #[test]
    fn test_render_openai() {
        let out = render_openai(&aggregated(&[], &["Hello"]), "gpt-4o");
        assert!(out.id.starts_with("chatcmpl-"));
        assert_eq!(out.object, "chat.completion");
        assert_eq!(out.model, "gpt-4o");
        assert_eq!(out.choices[0].message.content, "Hello");
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(out.usage.total_tokens, out.usage.prompt_tokens + out.usage.completion_tokens);
        assert!(out.sider_session.is_none());
    }
}
