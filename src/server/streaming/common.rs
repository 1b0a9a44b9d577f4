use crate::error::BridgeError;
use crate::providers::openai::{
    AssistantMessage, ChatCompletionChunk, ChatCompletionResponse, Choice, ChunkChoice, ChunkDelta,
    ToolCall,
};
use crate::server::tools::AssistantReply;
use crate::server::util::{completion_id, unix_now};

const CHUNK_OBJECT: &str = "chat.completion.chunk";
const COMPLETION_OBJECT: &str = "chat.completion";
const ASSISTANT_ROLE: &str = "assistant";

/// Builds the OpenAI-shaped output for one response; every chunk shares one id and timestamp.
#[derive(Debug, Clone)]
pub struct ResponseFramer {
    id: String,
    created: u64,
    model: String,
}

impl ResponseFramer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            created: unix_now(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: CHUNK_OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            error: None,
        }
    }

    /// Delta chunk for one fragment. The first chunk of a response also announces the role.
    pub fn content(&self, text: &str, first: bool) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                role: first.then(|| ASSISTANT_ROLE.to_string()),
                content: Some(text.to_string()),
                tool_calls: None,
            },
            None,
        )
    }

    pub fn tool_calls(&self, calls: &[ToolCall]) -> ChatCompletionChunk {
        let indexed = calls
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, mut call)| {
                call.index = Some(i as u32);
                call
            })
            .collect();
        self.chunk(
            ChunkDelta {
                role: Some(ASSISTANT_ROLE.to_string()),
                content: None,
                tool_calls: Some(indexed),
            },
            None,
        )
    }

    pub fn finish(&self, reason: &str) -> ChatCompletionChunk {
        self.chunk(ChunkDelta::default(), Some(reason))
    }

    /// Closing chunk for a stream whose upstream failed after text was already sent.
    pub fn failure(&self, err: &BridgeError) -> ChatCompletionChunk {
        let mut chunk = self.finish("stop");
        chunk.error = Some(err.body().error);
        chunk
    }

    /// Chunks for a reply that was buffered in full, without the `[DONE]` marker.
    pub fn reply_chunks(&self, reply: &AssistantReply) -> Vec<ChatCompletionChunk> {
        let body = match reply {
            AssistantReply::Text(text) => self.content(text, true),
            AssistantReply::ToolCalls(calls) => self.tool_calls(calls),
        };
        vec![body, self.finish(reply.finish_reason())]
    }

    pub fn completion(&self, reply: AssistantReply) -> ChatCompletionResponse {
        let finish_reason = reply.finish_reason().to_string();
        let message = match reply {
            AssistantReply::Text(text) => AssistantMessage {
                role: ASSISTANT_ROLE.to_string(),
                content: Some(text),
                tool_calls: None,
            },
            AssistantReply::ToolCalls(calls) => AssistantMessage {
                role: ASSISTANT_ROLE.to_string(),
                content: None,
                tool_calls: Some(calls),
            },
        };
        ChatCompletionResponse {
            id: self.id.clone(),
            object: COMPLETION_OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::openai::FunctionCall;

    #[test]
    fn chunks_share_identity_and_echo_model() {
        let framer = ResponseFramer::new("Claude-3-Sonnet-32K");
        let first = framer.content("Hel", true);
        let second = framer.content("lo", false);
        let last = framer.finish("stop");

        assert_eq!(first.id, last.id);
        assert_eq!(first.created, second.created);
        assert_eq!(first.object, "chat.completion.chunk");
        assert_eq!(first.model, "Claude-3-Sonnet-32K");
        assert_eq!(first.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(second.choices[0].delta.role, None);
        assert_eq!(second.choices[0].delta.content.as_deref(), Some("lo"));
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(last.choices[0].delta.content.is_none());
    }

    #[test]
    fn failure_chunk_carries_error_detail() {
        let framer = ResponseFramer::new("Bot");
        let chunk = framer.failure(&BridgeError::UpstreamTimeout("too slow".into()));
        let err = chunk.error.unwrap();
        assert_eq!(err.code, 504);
        assert_eq!(err.message, "too slow");
    }

    #[test]
    fn completion_wraps_text_or_tool_calls() {
        let framer = ResponseFramer::new("Bot");
        let text = framer.completion(AssistantReply::Text("all of it".into()));
        assert_eq!(text.object, "chat.completion");
        assert_eq!(text.choices[0].message.content.as_deref(), Some("all of it"));
        assert_eq!(text.choices[0].finish_reason, "stop");

        let call = ToolCall {
            index: None,
            id: "call_1".into(),
            kind: "function".into(),
            function: FunctionCall {
                name: "ls".into(),
                arguments: "{}".into(),
            },
        };
        let tools = framer.completion(AssistantReply::ToolCalls(vec![call.clone()]));
        assert_eq!(tools.choices[0].message.content, None);
        assert_eq!(tools.choices[0].message.tool_calls, Some(vec![call.clone()]));
        assert_eq!(tools.choices[0].finish_reason, "tool_calls");

        let streamed = framer.reply_chunks(&AssistantReply::ToolCalls(vec![call]));
        assert_eq!(
            streamed[0].choices[0].delta.tool_calls.as_ref().unwrap()[0].index,
            Some(0)
        );
        assert_eq!(streamed[1].choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }
}
