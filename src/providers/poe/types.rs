use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::providers::streaming::{ConversationTurn, TurnRole, UpstreamCallSpec};

pub const PROTOCOL_VERSION: &str = "1.2";
pub const CONTENT_TYPE_MARKDOWN: &str = "text/markdown";

/// Body of `POST /bot/{name}`.
#[derive(Debug, Serialize)]
pub struct QueryRequest<'a> {
    pub version: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub query: Vec<ProtocolMessage<'a>>,
    pub user_id: &'static str,
    pub conversation_id: &'static str,
    pub message_id: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stop_sequences: &'a [String],
    pub skip_system_prompt: bool,
    pub logit_bias: Map<String, Value>,
}

impl<'a> QueryRequest<'a> {
    pub fn from_call(call: &'a UpstreamCallSpec) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind: "query",
            query: call.turns.iter().map(ProtocolMessage::from_turn).collect(),
            user_id: "",
            conversation_id: "",
            message_id: "",
            temperature: call.temperature,
            stop_sequences: &call.stop_sequences,
            skip_system_prompt: false,
            logit_bias: Map::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProtocolMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
    pub content_type: &'static str,
    pub timestamp: u64,
    pub message_id: &'static str,
    pub feedback: Vec<Value>,
    pub attachments: Vec<Value>,
}

impl<'a> ProtocolMessage<'a> {
    fn from_turn(turn: &'a ConversationTurn) -> Self {
        Self {
            role: poe_role(turn.role),
            content: &turn.content,
            content_type: CONTENT_TYPE_MARKDOWN,
            timestamp: 0,
            message_id: "",
            feedback: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

pub fn poe_role(role: TurnRole) -> &'static str {
    match role {
        TurnRole::System => "system",
        TurnRole::User => "user",
        TurnRole::Bot => "bot",
    }
}

#[derive(Debug, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub allow_retry: Option<bool>,
    #[serde(default)]
    pub error_type: Option<String>,
}

/// A decoded server-sent event from the bot API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    Text(String),
    ReplaceResponse(String),
    Done,
    Error {
        text: String,
        allow_retry: bool,
        error_type: Option<String>,
    },
    Malformed(String),
    Ignored,
}

impl BotEvent {
    pub fn decode(event: &str, data: &str) -> Self {
        match event {
            "text" => match serde_json::from_str::<TextPayload>(data) {
                Ok(p) => BotEvent::Text(p.text),
                Err(e) => BotEvent::Malformed(format!("bad text event: {}", e)),
            },
            "replace_response" => match serde_json::from_str::<TextPayload>(data) {
                Ok(p) => BotEvent::ReplaceResponse(p.text),
                Err(e) => BotEvent::Malformed(format!("bad replace_response event: {}", e)),
            },
            "done" => BotEvent::Done,
            "error" => {
                let payload = serde_json::from_str::<ErrorPayload>(data).unwrap_or_default();
                BotEvent::Error {
                    text: payload
                        .text
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| "unknown error".to_string()),
                    allow_retry: payload.allow_retry.unwrap_or(false),
                    error_type: payload.error_type,
                }
            }
            _ => BotEvent::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_keeps_turn_order_and_maps_roles() {
        let call = UpstreamCallSpec {
            bot_name: "Bot".into(),
            turns: vec![
                ConversationTurn::new(TurnRole::System, "rules"),
                ConversationTurn::new(TurnRole::User, "q1"),
                ConversationTurn::new(TurnRole::Bot, "a1"),
                ConversationTurn::new(TurnRole::User, "q2"),
            ],
            api_key: "k".into(),
            temperature: Some(0.5),
            stop_sequences: vec!["END".into()],
        };
        let body = serde_json::to_value(QueryRequest::from_call(&call)).unwrap();

        assert_eq!(body["version"], PROTOCOL_VERSION);
        assert_eq!(body["type"], "query");
        assert_eq!(body["temperature"], json!(0.5));
        assert_eq!(body["stop_sequences"], json!(["END"]));
        let roles: Vec<_> = body["query"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| (m["role"].as_str().unwrap(), m["content"].as_str().unwrap()))
            .collect();
        assert_eq!(
            roles,
            vec![("system", "rules"), ("user", "q1"), ("bot", "a1"), ("user", "q2")]
        );
        assert_eq!(body["query"][0]["content_type"], CONTENT_TYPE_MARKDOWN);
    }

    #[test]
    fn decodes_known_events() {
        assert_eq!(
            BotEvent::decode("text", r#"{"text": "Hel"}"#),
            BotEvent::Text("Hel".into())
        );
        assert_eq!(BotEvent::decode("done", "{}"), BotEvent::Done);
        assert_eq!(BotEvent::decode("meta", r#"{"content_type": "text/markdown"}"#), BotEvent::Ignored);
        assert_eq!(
            BotEvent::decode(
                "error",
                r#"{"text": "Cannot access private bot: Foo", "allow_retry": false, "error_type": "privacy_authorization_error"}"#
            ),
            BotEvent::Error {
                text: "Cannot access private bot: Foo".into(),
                allow_retry: false,
                error_type: Some("privacy_authorization_error".into()),
            }
        );
        assert!(matches!(BotEvent::decode("text", "not json"), BotEvent::Malformed(_)));
    }

    #[test]
    fn error_event_without_payload_still_decodes() {
        assert_eq!(
            BotEvent::decode("error", ""),
            BotEvent::Error {
                text: "unknown error".into(),
                allow_retry: false,
                error_type: None,
            }
        );
    }
}
