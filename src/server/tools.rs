use serde_json::{Value, json};

use crate::providers::openai::ToolCall;
use crate::server::util::tool_call_id;

/// Instructions prepended when the caller offers tools. Poe bots have no native
/// function calling, so the call is requested as a bare JSON reply.
pub const TOOL_USE_INSTRUCTIONS: &str = r#"You are working as a command-line coding agent and may call the tools listed below.
To call tools, reply with ONLY a JSON object and nothing else, in this form:
{"tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "<tool name>", "arguments": "<arguments as a JSON-encoded string>"}}]}
Do not wrap the JSON in Markdown. Results come back in later messages that start with "Tool result".
If no tool is needed, answer in plain Markdown instead."#;

pub fn tool_manifest(tools: &[Value]) -> String {
    let mut manifest = String::from("## Available Tools for This Request\n");
    for tool in tools {
        if tool.get("type").and_then(Value::as_str) != Some("function") {
            continue;
        }
        let Some(func) = tool.get("function") else {
            continue;
        };
        let name = func.get("name").and_then(Value::as_str).unwrap_or("unnamed");
        let description = func
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");
        let parameters = func.get("parameters").cloned().unwrap_or_else(|| json!({}));
        manifest.push_str(&format!(
            "- **{}**: {}\n  - Parameters: `{}`\n",
            name, description, parameters
        ));
    }
    manifest
}

pub fn tool_prompt(tools: &[Value]) -> String {
    format!("{}\n\n{}", TOOL_USE_INSTRUCTIONS, tool_manifest(tools))
}

/// Renders earlier assistant tool calls the same way the bot is asked to emit them.
pub fn render_tool_calls(calls: &[ToolCall]) -> String {
    json!({ "tool_calls": calls }).to_string()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Reads a `{"tool_calls": [...]}` reply. Anything else is ordinary text.
pub fn parse_tool_calls(text: &str) -> Option<Vec<ToolCall>> {
    let trimmed = strip_code_fence(text.trim());
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    let mut value: Value = serde_json::from_str(trimmed).ok()?;
    let raw_calls = value.get_mut("tool_calls")?.as_array_mut()?;

    let mut calls = Vec::with_capacity(raw_calls.len());
    for raw in raw_calls.iter_mut() {
        let function = raw.get_mut("function")?.as_object_mut()?;
        let arguments = match function.remove("arguments") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => "{}".to_string(),
        };
        function.insert("arguments".to_string(), Value::String(arguments));

        let mut call: ToolCall = serde_json::from_value(raw.take()).ok()?;
        if call.id.trim().is_empty() {
            call.id = tool_call_id();
        }
        if call.kind.is_empty() {
            call.kind = "function".to_string();
        }
        call.index = None;
        calls.push(call);
    }

    if calls.is_empty() { None } else { Some(calls) }
}

/// True while a partial reply could still turn out to be a tool-call object.
/// Once this is false the reply is prose and can be relayed as it arrives.
pub fn may_be_tool_call(prefix: &str) -> bool {
    let start = prefix.trim_start();
    start.is_empty() || start.starts_with('{') || start.starts_with("```") || "```".starts_with(start)
}

/// What the assistant produced once the whole reply is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

impl AssistantReply {
    pub fn from_text(text: String, tool_mode: bool) -> Self {
        if tool_mode {
            if let Some(calls) = parse_tool_calls(&text) {
                return AssistantReply::ToolCalls(calls);
            }
        }
        AssistantReply::Text(text)
    }

    pub fn finish_reason(&self) -> &'static str {
        match self {
            AssistantReply::Text(_) => "stop",
            AssistantReply::ToolCalls(_) => "tool_calls",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lists_function_tools_only() {
        let tools = vec![
            json!({"type": "function", "function": {
                "name": "read_file",
                "description": "Read a file",
                "parameters": {"type": "object", "properties": {"path": {"type": "string"}}}
            }}),
            json!({"type": "retrieval"}),
        ];
        let manifest = tool_manifest(&tools);
        assert!(manifest.starts_with("## Available Tools for This Request\n"));
        assert!(manifest.contains("- **read_file**: Read a file\n"));
        assert!(manifest.contains(r#"  - Parameters: `{"properties":{"path":{"type":"string"}},"type":"object"}`"#));
        assert!(!manifest.contains("retrieval"));
    }

    #[test]
    fn parses_tool_call_reply_and_fills_gaps() {
        let reply = r#"
        {"tool_calls": [
            {"function": {"name": "edit_file", "arguments": {"file_path": "src/main.py"}}},
            {"id": "call_keep", "type": "function", "function": {"name": "ls", "arguments": "{}"}}
        ]}"#;
        let calls = parse_tool_calls(reply).unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].kind, "function");
        assert_eq!(calls[0].function.name, "edit_file");
        assert_eq!(calls[0].function.arguments, r#"{"file_path":"src/main.py"}"#);
        assert_eq!(calls[1].id, "call_keep");
    }

    #[test]
    fn fenced_json_is_accepted() {
        let reply = "```json\n{\"tool_calls\": [{\"id\": \"c1\", \"type\": \"function\", \"function\": {\"name\": \"ls\", \"arguments\": \"{}\"}}]}\n```";
        assert_eq!(parse_tool_calls(reply).unwrap()[0].id, "c1");
    }

    #[test]
    fn plain_text_and_other_json_are_not_tool_calls() {
        assert_eq!(parse_tool_calls("Just an answer."), None);
        assert_eq!(parse_tool_calls(r#"{"answer": 42}"#), None);
        assert_eq!(parse_tool_calls(r#"{"tool_calls": []}"#), None);
        assert_eq!(parse_tool_calls("{not json}"), None);
    }

    #[test]
    fn reply_classification() {
        let text = AssistantReply::from_text("  hi  ".into(), false);
        assert_eq!(text, AssistantReply::Text("  hi  ".into()));
        assert_eq!(text.finish_reason(), "stop");

        let untouched = AssistantReply::from_text("  hi  ".into(), true);
        assert_eq!(untouched, AssistantReply::Text("  hi  ".into()));

        let calls = AssistantReply::from_text(
            r#"{"tool_calls": [{"id": "c", "type": "function", "function": {"name": "ls", "arguments": "{}"}}]}"#.into(),
            true,
        );
        assert_eq!(calls.finish_reason(), "tool_calls");
    }

    #[test]
    fn prose_is_recognised_from_its_first_characters() {
        for undecided in ["", "  \n", "{", " {\"tool", "`", "``", "```json\n{"] {
            assert!(may_be_tool_call(undecided), "{:?}", undecided);
        }
        for prose in ["Hel", "  Sure", "`code`", "[1, 2]"] {
            assert!(!may_be_tool_call(prose), "{:?}", prose);
        }
    }
}
