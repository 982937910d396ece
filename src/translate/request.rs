//! Translate inbound requests into provider requests.
//!
//! The provider takes a single text block per turn rather than a message
//! list, so prior turns are folded into a short, bounded context preamble.
//! Chat Completions requests are first bridged into the Messages shape with
//! [`openai_to_anthropic`], then share the same path.

use serde_json::{json, Map, Value};

use super::anthropic_types::{
    Message, MessageContent, MessagesRequest, Metadata, SystemContent, Tool, ToolChoice,
};
use super::openai_types::{ChatCompletionRequest, ChatMessage, ChatToolChoice};
use crate::error::{ProxyError, Result};
use crate::models::map_model_name;
use crate::provider::types::{
    ExtraInfo, ImageTool, MultiContent, PromptTemplate, ProviderRequest, ProviderTools, SearchTool,
    ThinkMode, WebBrowseTool,
};
use crate::session::ContinuityHints;

pub const ORIGIN_URL: &str =
    "chrome-extension://dhoenijjpgpeimemopealfcbiecgceod/standalone.html?from=sidebar";
pub const ORIGIN_TITLE: &str = "Sider";

/// Prior turns rendered into the context preamble.
const CONTEXT_TURNS: usize = 2;
/// Characters kept from each prior turn.
const TURN_CHARS: usize = 100;
/// Upper bound on the preamble ahead of `Current:`.
const CONTEXT_CHARS: usize = 300;
const CONTEXT_ELISION: &str = "...\n";

const SEARCH: &str = "search";
const CREATE_IMAGE: &str = "create_image";
const WEB_BROWSE: &str = "web_browse";

/// Declared tool names and the provider tool each activates.
const TOOL_NAMES: &[(&str, &str)] = &[
    ("create_image", CREATE_IMAGE),
    ("generate_image", CREATE_IMAGE),
    ("image_generation", CREATE_IMAGE),
    ("web_search", SEARCH),
    ("search_web", SEARCH),
    ("internet_search", SEARCH),
    ("browse_web", WEB_BROWSE),
    ("web_browsing", WEB_BROWSE),
    ("visit_url", WEB_BROWSE),
];

/// Translate a Messages request into a provider request.
/// Pure function: no I/O, continuity already resolved into `hints`.
///
/// # Errors
/// Returns `ProxyError::Validation` when the request is incomplete.
pub fn translate(req: &MessagesRequest, hints: &ContinuityHints) -> Result<ProviderRequest> {
    validate(req)?;

    let current = latest_user_text(req)?;
    let system = req
        .system
        .as_ref()
        .map(SystemContent::as_text)
        .unwrap_or_default();

    Ok(ProviderRequest {
        cid: hints.conversation_id.clone(),
        parent_message_id: hints.parent_message_id.clone(),
        model: map_model_name(&req.model),
        from: "chat".to_string(),
        client_prompt: client_prompt(req),
        multi_content: vec![MultiContent {
            content_type: "text".to_string(),
            text: build_text(&req.messages, system.trim(), &current),
            user_input_text: current.clone(),
        }],
        prompt_templates: default_prompt_templates(),
        tools: build_tools(req.tools.as_deref(), search_flag(req.metadata.as_ref())),
        extra_info: Some(ExtraInfo {
            origin_url: ORIGIN_URL.to_string(),
            origin_title: ORIGIN_TITLE.to_string(),
        }),
        output_language: output_language(&current).to_string(),
        think_mode: Some(ThinkMode {
            enable: req
                .metadata
                .as_ref()
                .and_then(|m| m.think_enabled)
                .unwrap_or(true),
        }),
    })
}

/// Reject requests the provider cannot be asked about.
///
/// # Errors
/// Returns `ProxyError::Validation` describing the first problem found.
pub fn validate(req: &MessagesRequest) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(ProxyError::validation("missing required field: model"));
    }
    if req.messages.is_empty() {
        return Err(ProxyError::validation("messages array cannot be empty"));
    }
    for (i, msg) in req.messages.iter().enumerate() {
        if msg.role != "user" && msg.role != "assistant" {
            return Err(ProxyError::validation(format!(
                "messages[{i}]: invalid role '{}', must be 'user' or 'assistant'",
                msg.role
            )));
        }
        if msg.content.is_none() {
            return Err(ProxyError::validation(format!(
                "messages[{i}]: content cannot be empty"
            )));
        }
    }
    if !req.messages.iter().any(|m| m.role == "user") {
        return Err(ProxyError::validation("at least one user message is required"));
    }
    Ok(())
}

/// Whether the conversation already contains an assistant turn.
#[must_use]
pub fn has_assistant_turn(req: &MessagesRequest) -> bool {
    req.messages.iter().any(|m| m.role == "assistant")
}

fn message_text(msg: &Message) -> String {
    msg.content
        .as_ref()
        .map(MessageContent::flatten)
        .unwrap_or_default()
}

fn latest_user_text(req: &MessagesRequest) -> Result<String> {
    let text = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(message_text)
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ProxyError::validation("latest user message has no text content"));
    }
    Ok(text)
}

/// `zh-CN` when the text contains a CJK unified ideograph, else `en`.
#[must_use]
pub fn output_language(text: &str) -> &'static str {
    if text.chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c)) {
        "zh-CN"
    } else {
        "en"
    }
}

/// Build the provider text block for the current turn.
///
/// A single-message conversation sends the user text, prefixed by the system
/// prompt when there is one. Longer conversations send a preamble of the
/// system prompt and up to two prior turns, capped at [`CONTEXT_CHARS`]
/// characters, followed by `Current: <text>`.
#[must_use]
pub fn build_text(messages: &[Message], system: &str, current: &str) -> String {
    if messages.len() <= 1 {
        if system.is_empty() {
            return current.to_string();
        }
        return format!("{system}\n\n{current}").trim().to_string();
    }

    let mut context = String::new();
    if !system.is_empty() {
        context.push_str("System: ");
        context.push_str(system);
        context.push_str("\n\n");
    }

    let prior = &messages[..messages.len() - 1];
    for msg in &prior[prior.len().saturating_sub(CONTEXT_TURNS)..] {
        let text = message_text(msg);
        if text.is_empty() {
            continue;
        }
        let role = if msg.role == "assistant" { "Assistant" } else { "Human" };
        context.push_str(role);
        context.push_str(": ");
        context.push_str(&truncate_chars(&text, TURN_CHARS, "..."));
        context.push('\n');
    }

    if context.is_empty() {
        return current.to_string();
    }

    if context.chars().count() > CONTEXT_CHARS {
        let keep = CONTEXT_CHARS - CONTEXT_ELISION.len();
        context = truncate_chars(&context, keep, CONTEXT_ELISION).into_owned();
    }
    format!("{context}Current: {current}")
}

/// `s` unchanged when it has at most `max` characters, otherwise its first
/// `max` characters followed by `suffix`.
fn truncate_chars<'a>(s: &'a str, max: usize, suffix: &str) -> std::borrow::Cow<'a, str> {
    if s.chars().count() <= max {
        return s.into();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}{suffix}").into()
}

fn search_flag(metadata: Option<&Metadata>) -> Option<bool> {
    metadata.and_then(|m| m.search_enabled)
}

/// Resolve tool activation from declared tools and the search flag.
///
/// Declared names go through [`TOOL_NAMES`] (unknown names are kept as-is)
/// and are deduplicated in declaration order. An explicit search flag then
/// adds or removes `search`; without one the declarations decide.
#[must_use]
pub fn build_tools(declared: Option<&[Tool]>, search_enabled: Option<bool>) -> ProviderTools {
    let mut tools = ProviderTools::default();

    for tool in declared.unwrap_or_default() {
        let name = TOOL_NAMES
            .iter()
            .find(|(alias, _)| *alias == tool.name)
            .map_or(tool.name.as_str(), |(_, canonical)| *canonical);
        if tools.auto.iter().any(|t| t == name) {
            continue;
        }
        tools.auto.push(name.to_string());
        match name {
            CREATE_IMAGE => {
                tools.image = Some(ImageTool {
                    quality_level: "high".to_string(),
                });
            }
            SEARCH => tools.search = Some(default_search()),
            WEB_BROWSE => {
                tools.web_browse = Some(WebBrowseTool {
                    enabled: true,
                    timeout: Some(30),
                });
            }
            _ => {}
        }
    }

    match search_enabled {
        Some(true) => {
            if !tools.auto.iter().any(|t| t == SEARCH) {
                tools.auto.push(SEARCH.to_string());
            }
            if declared.is_some_and(|d| !d.is_empty()) && tools.search.is_none() {
                tools.search = Some(default_search());
            }
        }
        Some(false) => {
            tools.auto.retain(|t| t != SEARCH);
            tools.search = None;
        }
        None => {}
    }

    tools
}

fn default_search() -> SearchTool {
    SearchTool {
        enabled: true,
        max_results: Some(10),
    }
}

/// Only temperature in `0.0..=1.0` is forwarded.
fn client_prompt(req: &MessagesRequest) -> Map<String, Value> {
    let mut prompt = Map::new();
    if let Some(t) = req.temperature.filter(|t| (0.0..=1.0).contains(t)) {
        prompt.insert("temperature".to_string(), json!(t));
    }
    prompt
}

fn default_prompt_templates() -> Vec<PromptTemplate> {
    let mut artifacts = Map::new();
    artifacts.insert("lang".to_string(), json!("original"));
    vec![
        PromptTemplate {
            key: "artifacts".to_string(),
            attributes: artifacts,
        },
        PromptTemplate {
            key: "thinking_mode".to_string(),
            attributes: Map::new(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Chat Completions -> Messages bridge
// ---------------------------------------------------------------------------

/// Reshape a Chat Completions request into a Messages request.
///
/// System messages become the system prompt; tool and function messages
/// become assistant turns describing the tool output. Unknown roles are
/// dropped.
#[must_use]
pub fn openai_to_anthropic(req: &ChatCompletionRequest) -> MessagesRequest {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" => system_parts.push(chat_text(msg)),
            "user" | "assistant" => messages.push(Message {
                role: msg.role.clone(),
                content: Some(MessageContent::Text(chat_text(msg))),
            }),
            "tool" | "function" => messages.push(Message {
                role: "assistant".to_string(),
                content: Some(MessageContent::Text(tool_message_text(msg))),
            }),
            _ => {}
        }
    }

    let system = system_parts.join("\n\n").trim().to_string();

    let tools = req.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
        tools
            .iter()
            .map(|t| {
                let params = &t.function.parameters;
                Tool {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    input_schema: json!({
                        "type": "object",
                        "properties": params.get("properties").cloned().unwrap_or_else(|| json!({})),
                        "required": params.get("required").cloned().unwrap_or_else(|| json!([])),
                    }),
                }
            })
            .collect()
    });

    MessagesRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_tokens,
        system: (!system.is_empty()).then_some(SystemContent::Text(system)),
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(translate_tool_choice),
        metadata: req.metadata.clone(),
    }
}

fn chat_text(msg: &ChatMessage) -> String {
    msg.content.as_ref().map(|c| c.flatten()).unwrap_or_default()
}

fn tool_message_text(msg: &ChatMessage) -> String {
    let content = chat_text(msg);
    match msg.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => format!("Tool {name} result:\n{content}"),
        None if content.is_empty() => "[empty tool result]".to_string(),
        None => content,
    }
}

fn translate_tool_choice(choice: &ChatToolChoice) -> Option<ToolChoice> {
    match choice {
        ChatToolChoice::String(s) if s == "auto" || s == "none" => Some(ToolChoice {
            choice_type: "auto".to_string(),
            name: None,
        }),
        ChatToolChoice::String(_) => None,
        ChatToolChoice::Specific(choice) if choice.choice_type == "function" => Some(ToolChoice {
            choice_type: "tool".to_string(),
            name: Some(choice.function.name.clone()),
        }),
        ChatToolChoice::Specific(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::ChatContent;

    fn msg(role: &str, text: &str) -> Message {
        Message {
            role: role.to_string(),
            content: Some(MessageContent::Text(text.to_string())),
        }
    }

    fn request(model: &str, messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: model.to_string(),
            messages,
            ..MessagesRequest::default()
        }
    }

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: None,
            input_schema: json!({}),
        }
    }

    #[test]
    fn test_chinese_single_turn() {
        let req = request("claude-sonnet-4", vec![msg("user", "你好")]);
        let out = translate(&req, &ContinuityHints::default()).unwrap();

        assert_eq!(out.output_language, "zh-CN");
        assert_eq!(out.model, "claude-4-sonnet-think");
        assert_eq!(out.multi_content[0].text, "你好");
        assert_eq!(out.multi_content[0].user_input_text, "你好");
        assert_eq!(out.cid, "");
        assert_eq!(out.from, "chat");
        assert!(out.think_mode.unwrap().enable);
        assert_eq!(out.prompt_templates.len(), 2);
        assert_eq!(out.prompt_templates[0].attributes["lang"], "original");
        assert!(out.tools.auto.is_empty());
    }

    #[test]
    fn test_validation_failures() {
        let cases = vec![
            request("", vec![msg("user", "hi")]),
            request("m", vec![]),
            request("m", vec![msg("user", "hi"), msg("system", "x")]),
            request("m", vec![msg("assistant", "hi")]),
            request(
                "m",
                vec![Message {
                    role: "user".to_string(),
                    content: None,
                }],
            ),
            request("m", vec![msg("user", "   ")]),
        ];
        for req in cases {
            assert!(
                matches!(
                    translate(&req, &ContinuityHints::default()),
                    Err(ProxyError::Validation { .. })
                ),
                "expected validation error for {req:?}"
            );
        }
    }

    #[test]
    fn test_single_turn_with_system_prompt() {
        let mut req = request("m", vec![msg("user", "question")]);
        req.system = Some(SystemContent::Text("Be brief.".to_string()));
        let out = translate(&req, &ContinuityHints::default()).unwrap();
        assert_eq!(out.multi_content[0].text, "Be brief.\n\nquestion");
        assert_eq!(out.multi_content[0].user_input_text, "question");
    }

    #[test]
    fn test_multi_turn_context() {
        let messages = vec![
            msg("user", "first"),
            msg("assistant", "reply one"),
            msg("user", "second"),
            msg("assistant", "reply two"),
            msg("user", "third"),
        ];
        let text = build_text(&messages, "sys", "third");
        assert_eq!(
            text,
            "System: sys\n\nHuman: second\nAssistant: reply two\nCurrent: third"
        );
    }

    #[test]
    fn test_multi_turn_truncates_each_turn() {
        let long = "a".repeat(150);
        let messages = vec![msg("assistant", &long), msg("user", "now")];
        let text = build_text(&messages, "", "now");
        assert_eq!(text, format!("Assistant: {}...\nCurrent: now", "a".repeat(100)));
    }

    #[test]
    fn test_multi_turn_context_never_exceeds_cap() {
        let system = "系".repeat(400);
        let messages = vec![msg("user", &"x".repeat(500)), msg("assistant", "ok"), msg("user", "now")];
        let text = build_text(&messages, &system, "now");
        let (context, current) = text.split_once("Current: ").unwrap();
        assert!(context.chars().count() <= CONTEXT_CHARS);
        assert!(context.ends_with("...\n"));
        assert_eq!(current, "now");
    }

    #[test]
    fn test_multi_turn_without_context_sends_current_only() {
        let messages = vec![
            Message {
                role: "assistant".to_string(),
                content: Some(MessageContent::Blocks(vec![])),
            },
            msg("user", "now"),
        ];
        assert_eq!(build_text(&messages, "", "now"), "now");
    }

    #[test]
    fn test_tool_mapping_dedupes_and_configures() {
        let declared = vec![tool("web_search"), tool("search_web"), tool("generate_image"), tool("my_fn")];
        let tools = build_tools(Some(&declared), None);
        assert_eq!(tools.auto, vec!["search", "create_image", "my_fn"]);
        assert_eq!(tools.search.unwrap().max_results, Some(10));
        assert_eq!(tools.image.unwrap().quality_level, "high");
        assert!(tools.web_browse.is_none());
    }

    #[test]
    fn test_search_flag_adds_and_removes() {
        let none = build_tools(None, None);
        assert!(none.auto.is_empty());

        let enabled = build_tools(None, Some(true));
        assert_eq!(enabled.auto, vec!["search"]);

        let declared = vec![tool("internet_search"), tool("visit_url")];
        let disabled = build_tools(Some(&declared), Some(false));
        assert_eq!(disabled.auto, vec!["web_browse"]);
        assert!(disabled.search.is_none());
        assert_eq!(disabled.web_browse.unwrap().timeout, Some(30));

        let added = build_tools(Some(&[tool("visit_url")]), Some(true));
        assert_eq!(added.auto, vec!["web_browse", "search"]);
        assert!(added.search.is_some());
    }

    #[test]
    fn test_temperature_bounds_and_think_flag() {
        let mut req = request("m", vec![msg("user", "hi")]);
        req.temperature = Some(0.5);
        req.metadata = Some(Metadata {
            think_enabled: Some(false),
            ..Metadata::default()
        });
        let out = translate(&req, &ContinuityHints::default()).unwrap();
        assert_eq!(out.client_prompt["temperature"], 0.5);
        assert!(!out.think_mode.unwrap().enable);

        req.temperature = Some(1.5);
        let out = translate(&req, &ContinuityHints::default()).unwrap();
        assert!(out.client_prompt.is_empty());
    }

    #[test]
    fn test_continuity_hints_are_copied() {
        let req = request("m", vec![msg("user", "hi"), msg("assistant", "yo"), msg("user", "again")]);
        let hints = ContinuityHints {
            session_key: "continuous-conversation".to_string(),
            conversation_id: "prov-1".to_string(),
            parent_message_id: "a1".to_string(),
        };
        let out = translate(&req, &hints).unwrap();
        assert_eq!(out.cid, "prov-1");
        assert_eq!(out.parent_message_id, "a1");
        assert!(has_assistant_turn(&req));
    }

    #[test]
    fn test_output_language() {
        assert_eq!(output_language("hello"), "en");
        assert_eq!(output_language("hello 世界"), "zh-CN");
        assert_eq!(output_language("こんにちは"), "en");
    }

    #[test]
    fn test_openai_bridge() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "claude-4",
            "stream": true,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": "Rule one."},
                {"role": "system", "content": "Rule two."},
                {"role": "user", "content": [{"type": "text", "text": "look"}, {"type": "image_url", "image_url": {"url": "http://i/x.png"}}]},
                {"role": "tool", "name": "lookup", "content": "42"},
                {"role": "function", "content": ""},
                {"role": "user", "content": "and?"}
            ],
            "tools": [{"type": "function", "function": {"name": "web_search", "parameters": {"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]}}}],
            "tool_choice": {"type": "function", "function": {"name": "web_search"}}
        }))
        .unwrap();

        let out = openai_to_anthropic(&req);
        assert_eq!(out.system.as_ref().unwrap().as_text(), "Rule one.\n\nRule two.");
        assert_eq!(out.messages.len(), 4);
        assert_eq!(message_text(&out.messages[0]), "look\n[image:http://i/x.png]");
        assert_eq!(out.messages[1].role, "assistant");
        assert_eq!(message_text(&out.messages[1]), "Tool lookup result:\n42");
        assert_eq!(message_text(&out.messages[2]), "[empty tool result]");
        assert_eq!(out.stream, Some(true));
        let tools = out.tools.as_ref().unwrap();
        assert_eq!(tools[0].input_schema["required"], json!(["q"]));
        let choice = out.tool_choice.as_ref().unwrap();
        assert_eq!(choice.choice_type, "tool");
        assert_eq!(choice.name.as_deref(), Some("web_search"));

        let provider = translate(&out, &ContinuityHints::default()).unwrap();
        assert_eq!(provider.tools.auto, vec!["search"]);
        assert_eq!(provider.multi_content[0].user_input_text, "and?");
    }

    #[test]
    fn test_tool_choice_strings() {
        let auto = translate_tool_choice(&ChatToolChoice::String("none".to_string())).unwrap();
        assert_eq!(auto.choice_type, "auto");
        assert!(translate_tool_choice(&ChatToolChoice::String("required".to_string())).is_none());
    }

    #[test]
    fn test_bridge_drops_unknown_roles() {
        let req = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage {
                role: "developer".to_string(),
                content: Some(ChatContent::Text("x".to_string())),
                name: None,
                tool_call_id: None,
            }],
            ..ChatCompletionRequest::default()
        };
        assert!(openai_to_anthropic(&req).messages.is_empty());
    }
}
