use crate::config::Settings;
use crate::error::{BridgeError, Result};
use crate::providers::openai::{ChatCompletionRequest, ChatMessage, Role};
use crate::providers::streaming::{ConversationTurn, TurnRole, UpstreamCallSpec};
use crate::server::model_parser::select_bot;
use crate::server::tools::{render_tool_calls, tool_prompt};

/// A chat request ready to go upstream.
///
/// Notes:
/// - `call` owns everything the Poe client needs, including the upstream key.
/// - `tool_mode` means the reply must be buffered and checked for a tool-call JSON object.
#[derive(Debug)]
pub struct TranslatedRequest {
    pub call: UpstreamCallSpec,
    pub stream: bool,
    pub tool_mode: bool,
}

pub fn parse_chat_request(body: &[u8]) -> Result<ChatCompletionRequest> {
    serde_json::from_slice(body).map_err(|e| BridgeError::MalformedRequest(e.to_string()))
}

pub fn translate_request(
    mut request: ChatCompletionRequest,
    settings: &Settings,
) -> Result<TranslatedRequest> {
    if request.messages.is_empty() {
        return Err(BridgeError::MalformedRequest(
            "No messages provided.".to_string(),
        ));
    }

    let bot_name = select_bot(&mut request.messages, &settings.poe.default_bot);
    let tool_mode = settings.agent.inject_tools && request.wants_tools();

    let mut turns = Vec::with_capacity(request.messages.len() + 2);
    if let Some(prompt) = settings
        .agent
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    {
        turns.push(ConversationTurn::new(TurnRole::System, prompt));
    }
    if tool_mode {
        let tools = request.tools.as_deref().unwrap_or_default();
        turns.push(ConversationTurn::new(TurnRole::System, tool_prompt(tools)));
    }
    turns.extend(request.messages.iter().map(message_to_turn));

    Ok(TranslatedRequest {
        call: UpstreamCallSpec {
            bot_name,
            turns,
            api_key: settings.credential.upstream_api_key().to_string(),
            temperature: request.temperature,
            stop_sequences: request.stop.map(|s| s.into_vec()).unwrap_or_default(),
        },
        stream: request.stream.unwrap_or(false),
        tool_mode,
    })
}

fn message_to_turn(message: &ChatMessage) -> ConversationTurn {
    let text = message.text();
    match message.role {
        Role::System => ConversationTurn::new(TurnRole::System, text),
        Role::User => ConversationTurn::new(TurnRole::User, text),
        Role::Assistant => match message.tool_calls.as_deref() {
            Some(calls) if !calls.is_empty() => {
                let rendered = render_tool_calls(calls);
                let content = if text.is_empty() {
                    rendered
                } else {
                    format!("{}\n{}", text, rendered)
                };
                ConversationTurn::new(TurnRole::Bot, content)
            }
            _ => ConversationTurn::new(TurnRole::Bot, text),
        },
        Role::Tool => {
            let call_id = message.tool_call_id.as_deref().unwrap_or("unknown");
            ConversationTurn::new(
                TurnRole::User,
                format!("Tool result ({}):\n{}", call_id, text),
            )
        }
    }
}
