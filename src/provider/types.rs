//! Wire types for the Sider chat API.
//!
//! Requests are a single JSON POST; responses arrive as `data: <json>` SSE
//! lines, each decoding to a [`ProviderEvent`]. The provider sends `null`
//! for absent strings, so inbound fields decode `null` as their default.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Request types (what we send TO the provider)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Provider conversation id, empty for a new conversation.
    pub cid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_message_id: String,
    pub model: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub client_prompt: Map<String, Value>,
    pub multi_content: Vec<MultiContent>,
    pub prompt_templates: Vec<PromptTemplate>,
    pub tools: ProviderTools,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<ExtraInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think_mode: Option<ThinkMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
    pub user_input_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub key: String,
    pub attributes: Map<String, Value>,
}

/// Tool activation: ordered enabled tool names plus per-tool settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTools {
    pub auto: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_browse: Option<WebBrowseTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTool {
    pub quality_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTool {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebBrowseTool {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraInfo {
    pub origin_url: String,
    pub origin_title: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThinkMode {
    pub enable: bool,
}

// ---------------------------------------------------------------------------
// SSE event types (what the provider streams back)
// ---------------------------------------------------------------------------

/// One decoded `data:` line. `code == 0` means success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub msg: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventData {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_start: Option<MessageStart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<ReasoningContent>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStart {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_message_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assistant_message_id: String,
}

impl MessageStart {
    pub fn message_ids(&self) -> MessageIds {
        MessageIds {
            user: self.user_message_id.clone(),
            assistant: self.assistant_message_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningContent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
}

// ---------------------------------------------------------------------------
// Aggregated exchange result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIds {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assistant: String,
}

/// Latest known state of one provider tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_name: String,
    pub tool_id: String,
    pub result: Option<Value>,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Everything learned from one exchange's event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResponse {
    pub reasoning_parts: Vec<String>,
    pub text_parts: Vec<String>,
    /// One entry per tool-call id, in first-seen order.
    pub tool_results: Vec<ToolResult>,
    pub model: String,
    pub conversation_id: String,
    pub message_ids: Option<MessageIds>,
}

impl AggregatedResponse {
    pub fn text(&self) -> String {
        self.text_parts.concat()
    }

    pub fn reasoning(&self) -> String {
        self.reasoning_parts.concat()
    }

    pub fn tool_result(&self, id: &str) -> Option<&ToolResult> {
        self.tool_results.iter().find(|t| t.tool_id == id)
    }
}

// ---------------------------------------------------------------------------
// Conversation history (auxiliary endpoint)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEnvelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub msg: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: ConversationHistory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parent_message_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub multi_content: Vec<HistoryContent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryContent {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub content_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
}
