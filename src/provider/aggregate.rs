//! Folds provider SSE events into an [`AggregatedResponse`].
//!
//! Events are applied strictly in arrival order. Events with a non-zero
//! status code are ignored. Tool-call events upsert by id, so the last event
//! for an id decides its status, result and error.

use std::sync::Arc;

use super::types::{AggregatedResponse, ProviderEvent, ToolCall, ToolResult};
use crate::session::SessionTracker;

/// What applying one event did to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Non-zero status code or unknown type; nothing changed.
    Ignored,
    SessionStarted,
    Reasoning,
    Text,
    ToolCall,
}

pub struct Aggregator {
    response: AggregatedResponse,
    tracker: Option<Arc<SessionTracker>>,
    session_key: String,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            response: AggregatedResponse::default(),
            tracker: None,
            session_key: String::new(),
        }
    }

    /// Record session starts into `tracker`, additionally under `session_key`
    /// when it names a client-visible id different from the provider's.
    pub fn with_tracker(mut self, tracker: Arc<SessionTracker>, session_key: impl Into<String>) -> Self {
        self.tracker = Some(tracker);
        self.session_key = session_key.into();
        self
    }

    pub fn response(&self) -> &AggregatedResponse {
        &self.response
    }

    pub fn into_response(self) -> AggregatedResponse {
        self.response
    }

    pub fn apply(&mut self, event: &ProviderEvent) -> Applied {
        if event.code != 0 {
            return Applied::Ignored;
        }
        let data = &event.data;
        if !data.model.is_empty() {
            self.response.model = data.model.clone();
        }

        match data.event_type.as_str() {
            "message_start" => match &data.message_start {
                Some(start) => {
                    self.response.conversation_id = start.cid.clone();
                    self.response.message_ids = Some(start.message_ids());
                    self.record_session(
                        &start.cid,
                        &start.user_message_id,
                        &start.assistant_message_id,
                        &data.model,
                    );
                    Applied::SessionStarted
                }
                None => Applied::Ignored,
            },
            "reasoning_content" => match &data.reasoning_content {
                Some(rc) if !rc.text.is_empty() => {
                    self.response.reasoning_parts.push(rc.text.clone());
                    Applied::Reasoning
                }
                _ => Applied::Ignored,
            },
            "text" if !data.text.is_empty() => {
                self.response.text_parts.push(data.text.clone());
                Applied::Text
            }
            "tool_call" | "tool_call_start" | "tool_call_progress" | "tool_call_result" => {
                match &data.tool_call {
                    Some(tc) => {
                        upsert_tool_call(&mut self.response.tool_results, tc);
                        Applied::ToolCall
                    }
                    None => Applied::Ignored,
                }
            }
            _ => Applied::Ignored,
        }
    }

    fn record_session(&self, cid: &str, user_id: &str, assistant_id: &str, model: &str) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        if cid.is_empty() {
            return;
        }
        tracker.save(cid, cid, user_id, assistant_id, model);
        if !self.session_key.is_empty() && self.session_key != cid {
            tracker.save(&self.session_key, cid, user_id, assistant_id, model);
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert_tool_call(results: &mut Vec<ToolResult>, tc: &ToolCall) {
    // search payload takes precedence over a generic result
    let payload = tc.search.clone().or_else(|| tc.result.clone());

    let Some(existing) = results.iter_mut().find(|r| r.tool_id == tc.id) else {
        results.push(ToolResult {
            tool_name: tc.name.clone(),
            tool_id: tc.id.clone(),
            result: payload,
            status: tc.status.clone(),
            error: tc.error.clone(),
        });
        return;
    };

    existing.status = tc.status.clone();
    if existing.tool_name.is_empty() {
        existing.tool_name = tc.name.clone();
    }
    if payload.is_some() {
        existing.result = payload;
    }
    if !tc.error.is_empty() {
        existing.error = tc.error.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{EventData, MessageIds, MessageStart, ReasoningContent};
    use serde_json::json;

    fn event(event_type: &str) -> ProviderEvent {
        ProviderEvent {
            code: 0,
            msg: String::new(),
            data: EventData {
                event_type: event_type.to_string(),
                model: "claude-4-sonnet-think".to_string(),
                ..EventData::default()
            },
        }
    }

    fn text(t: &str) -> ProviderEvent {
        let mut e = event("text");
        e.data.text = t.to_string();
        e
    }

    fn start(cid: &str, user: &str, assistant: &str) -> ProviderEvent {
        let mut e = event("message_start");
        e.data.message_start = Some(MessageStart {
            cid: cid.to_string(),
            user_message_id: user.to_string(),
            assistant_message_id: assistant.to_string(),
        });
        e
    }

    fn tool(event_type: &str, tc: ToolCall) -> ProviderEvent {
        let mut e = event(event_type);
        e.data.tool_call = Some(tc);
        e
    }

    #[test]
    fn test_message_start_and_text_parts() {
        let mut agg = Aggregator::new();
        assert_eq!(agg.apply(&start("c1", "u1", "a1")), Applied::SessionStarted);
        assert_eq!(agg.apply(&text("Hi")), Applied::Text);
        assert_eq!(agg.apply(&text(" there")), Applied::Text);

        let resp = agg.into_response();
        assert_eq!(resp.conversation_id, "c1");
        assert_eq!(resp.text_parts, vec!["Hi", " there"]);
        assert_eq!(resp.text(), "Hi there");
        assert_eq!(
            resp.message_ids,
            Some(MessageIds {
                user: "u1".to_string(),
                assistant: "a1".to_string()
            })
        );
        assert_eq!(resp.model, "claude-4-sonnet-think");
    }

    #[test]
    fn test_empty_fragments_and_failed_events_ignored() {
        let mut agg = Aggregator::new();
        assert_eq!(agg.apply(&text("")), Applied::Ignored);

        let mut reasoning = event("reasoning_content");
        reasoning.data.reasoning_content = Some(ReasoningContent {
            status: "processing".to_string(),
            text: String::new(),
        });
        assert_eq!(agg.apply(&reasoning), Applied::Ignored);

        let mut failed = text("should not appear");
        failed.code = 1;
        assert_eq!(agg.apply(&failed), Applied::Ignored);

        assert!(agg.response().text_parts.is_empty());
        assert!(agg.response().reasoning_parts.is_empty());
    }

    #[test]
    fn test_reasoning_parts_in_order() {
        let mut agg = Aggregator::new();
        for part in ["Let me ", "think."] {
            let mut e = event("reasoning_content");
            e.data.reasoning_content = Some(ReasoningContent {
                status: "processing".to_string(),
                text: part.to_string(),
            });
            agg.apply(&e);
        }
        assert_eq!(agg.response().reasoning(), "Let me think.");
    }

    #[test]
    fn test_tool_call_last_write_wins_single_entry() {
        let mut agg = Aggregator::new();
        agg.apply(&tool(
            "tool_call_start",
            ToolCall {
                id: "t1".to_string(),
                name: "search".to_string(),
                status: "start".to_string(),
                ..ToolCall::default()
            },
        ));
        agg.apply(&tool(
            "tool_call_result",
            ToolCall {
                id: "t1".to_string(),
                status: "done".to_string(),
                result: Some(json!({"x": 1})),
                ..ToolCall::default()
            },
        ));

        let resp = agg.response();
        assert_eq!(resp.tool_results.len(), 1);
        let t1 = resp.tool_result("t1").unwrap();
        assert_eq!(t1.status, "done");
        assert_eq!(t1.result, Some(json!({"x": 1})));
        assert_eq!(t1.tool_name, "search");
    }

    #[test]
    fn test_tool_call_keeps_result_and_error_when_absent() {
        let mut agg = Aggregator::new();
        agg.apply(&tool(
            "tool_call",
            ToolCall {
                id: "t1".to_string(),
                name: "search".to_string(),
                status: "running".to_string(),
                search: Some(json!({"hits": 3})),
                result: Some(json!("ignored")),
                error: "partial failure".to_string(),
                ..ToolCall::default()
            },
        ));
        agg.apply(&tool(
            "tool_call_progress",
            ToolCall {
                id: "t1".to_string(),
                status: "finished".to_string(),
                ..ToolCall::default()
            },
        ));

        let t1 = agg.response().tool_result("t1").unwrap();
        assert_eq!(t1.status, "finished");
        assert_eq!(t1.result, Some(json!({"hits": 3})));
        assert_eq!(t1.error, "partial failure");
    }

    #[test]
    fn test_tool_calls_keep_first_insertion_order() {
        let mut agg = Aggregator::new();
        for id in ["b", "a", "b"] {
            agg.apply(&tool(
                "tool_call",
                ToolCall {
                    id: id.to_string(),
                    status: "start".to_string(),
                    ..ToolCall::default()
                },
            ));
        }
        let ids: Vec<&str> = agg
            .response()
            .tool_results
            .iter()
            .map(|t| t.tool_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_session_start_feeds_tracker() {
        let tracker = Arc::new(SessionTracker::new("continuous-conversation"));
        let mut agg = Aggregator::new().with_tracker(tracker.clone(), "continuous-conversation");
        agg.apply(&start("c1", "u1", "a1"));

        assert_eq!(tracker.next_parent_message_id("c1"), "a1");
        let shared = tracker.get("continuous-conversation").unwrap();
        assert_eq!(shared.cid, "c1");
        assert_eq!(shared.model, "claude-4-sonnet-think");
        assert_eq!(tracker.len(), 2);
    }
}
