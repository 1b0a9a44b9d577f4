pub mod types;

pub use types::{
    AssistantMessage, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, Choice, ChunkChoice, ChunkDelta, FunctionCall, MessageContent, Role, ToolCall,
};
