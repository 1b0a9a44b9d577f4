use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

/// Speaker of one upstream conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    System,
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything needed for one upstream bot call. Built per request and consumed by the call.
#[derive(Clone)]
pub struct UpstreamCallSpec {
    pub bot_name: String,
    pub turns: Vec<ConversationTurn>,
    pub api_key: String,
    pub temperature: Option<f32>,
    pub stop_sequences: Vec<String>,
}

impl fmt::Debug for UpstreamCallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamCallSpec")
            .field("bot_name", &self.bot_name)
            .field("turns", &self.turns)
            .field("api_key", &"<redacted>")
            .field("temperature", &self.temperature)
            .field("stop_sequences", &self.stop_sequences)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network trouble, 5xx, or a stream that vanished mid-reply.
    Unavailable,
    /// Upstream said no: unknown or private bot, bad key, quota.
    Rejected,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl UpstreamFailure {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    /// The reply stopped before upstream signalled completion.
    pub fn incomplete() -> Self {
        Self::unavailable("upstream stream ended without a completion signal")
    }
}

/// One step of an upstream reply. The last item of every fragment stream has `is_final` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub text: String,
    pub is_final: bool,
    pub error: Option<UpstreamFailure>,
}

impl StreamFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            text: String::new(),
            is_final: true,
            error: None,
        }
    }

    pub fn failed(failure: UpstreamFailure) -> Self {
        Self {
            text: String::new(),
            is_final: true,
            error: Some(failure),
        }
    }

    /// Stand-in for a producer that stopped without a terminal fragment.
    pub fn dropped() -> Self {
        Self::failed(UpstreamFailure::incomplete())
    }
}

/// Lazy, finite, single-use sequence of fragments for one call.
pub type FragmentStream = Pin<Box<dyn Stream<Item = StreamFragment> + Send>>;

#[async_trait]
pub trait BotClient: Send + Sync {
    /// Opens one streaming call. Failures arrive as the terminal fragment, never as an `Err`.
    async fn stream_reply(&self, call: UpstreamCallSpec) -> FragmentStream;
}
