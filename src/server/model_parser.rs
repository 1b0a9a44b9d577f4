use crate::providers::openai::{ChatMessage, MessageContent, Role};

/// Marker that opens an inline bot override at the start of a prompt.
pub const DIRECTIVE_MARKER: &str = "#@";

/// Result of scanning a prompt for a `#@<bot>` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelDirective<'a> {
    Override { bot_name: &'a str, prompt: &'a str },
    Absent { text: &'a str },
}

impl<'a> ModelDirective<'a> {
    /// Scans the start of `text` for a directive.
    ///
    /// Examples:
    /// - "#@Claude-3-Sonnet-32K hello" -> Override { bot_name: "Claude-3-Sonnet-32K", prompt: "hello" }
    /// - "#@GPT-4o" -> Override { bot_name: "GPT-4o", prompt: "" }
    /// - "#@ hello" / "hello" -> Absent { text } (unchanged)
    pub fn parse(text: &'a str) -> Self {
        let Some(rest) = text.trim_start().strip_prefix(DIRECTIVE_MARKER) else {
            return Self::Absent { text };
        };
        let name_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (bot_name, remainder) = rest.split_at(name_end);
        if bot_name.is_empty() {
            return Self::Absent { text };
        }
        Self::Override {
            bot_name,
            prompt: remainder.trim_start(),
        }
    }

    pub fn bot_name(&self) -> Option<&'a str> {
        match self {
            Self::Override { bot_name, .. } => Some(*bot_name),
            Self::Absent { .. } => None,
        }
    }

    /// The prompt to forward: the remainder after the directive, or the original text.
    pub fn prompt(&self) -> &'a str {
        match self {
            Self::Override { prompt, .. } => *prompt,
            Self::Absent { text } => *text,
        }
    }
}

/// Picks the bot for this turn. A directive on the latest user message wins over
/// `default_bot` and is stripped from that message; nothing else is touched.
pub fn select_bot(messages: &mut [ChatMessage], default_bot: &str) -> String {
    let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) else {
        return default_bot.to_string();
    };

    let text = last_user.text();
    match ModelDirective::parse(&text) {
        ModelDirective::Override { bot_name, prompt } => {
            let bot_name = bot_name.to_string();
            last_user.content = Some(MessageContent::Text(prompt.to_string()));
            bot_name
        }
        ModelDirective::Absent { .. } => default_bot.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, text: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: Some(MessageContent::Text(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn test_parse_with_directive() {
        let parsed = ModelDirective::parse("#@Claude-3-Sonnet-32K hello");
        assert_eq!(parsed.bot_name(), Some("Claude-3-Sonnet-32K"));
        assert_eq!(parsed.prompt(), "hello");
    }

    #[test]
    fn test_parse_without_directive() {
        let parsed = ModelDirective::parse("hello #@NotADirective");
        assert_eq!(parsed, ModelDirective::Absent { text: "hello #@NotADirective" });
        assert_eq!(parsed.prompt(), "hello #@NotADirective");
    }

    #[test]
    fn directive_without_prompt_is_allowed() {
        let parsed = ModelDirective::parse("#@GPT-4o");
        assert_eq!(parsed.bot_name(), Some("GPT-4o"));
        assert_eq!(parsed.prompt(), "");
    }

    #[test]
    fn marker_without_name_is_not_a_directive() {
        assert_eq!(ModelDirective::parse("#@ hello").bot_name(), None);
        assert_eq!(ModelDirective::parse("#@").bot_name(), None);
    }

    #[test]
    fn leading_whitespace_and_multiline_remainder() {
        let parsed = ModelDirective::parse("  #@Gemini-2.5-Pro\n\nline one\nline two");
        assert_eq!(parsed.bot_name(), Some("Gemini-2.5-Pro"));
        assert_eq!(parsed.prompt(), "line one\nline two");
    }

    #[test]
    fn select_bot_rewrites_only_latest_user_message() {
        let mut messages = vec![
            msg(Role::System, "#@Ignored system"),
            msg(Role::User, "#@Old-Bot first"),
            msg(Role::Assistant, "reply"),
            msg(Role::User, "#@Claude-3-Sonnet-32K hello"),
        ];
        let bot = select_bot(&mut messages, "Default-Bot");
        assert_eq!(bot, "Claude-3-Sonnet-32K");
        assert_eq!(messages[3].text(), "hello");
        assert_eq!(messages[1].text(), "#@Old-Bot first");
        assert_eq!(messages[0].text(), "#@Ignored system");
    }

    #[test]
    fn select_bot_falls_back_to_default() {
        let mut messages = vec![msg(Role::User, "hello")];
        assert_eq!(select_bot(&mut messages, "Default-Bot"), "Default-Bot");
        assert_eq!(messages[0].text(), "hello");

        let mut no_user = vec![msg(Role::System, "#@Bot rules")];
        assert_eq!(select_bot(&mut no_user, "Default-Bot"), "Default-Bot");
    }

    #[test]
    fn select_bot_ignores_trailing_assistant_message() {
        let mut messages = vec![
            msg(Role::User, "#@Picked-Bot go"),
            msg(Role::Assistant, "#@Not-This"),
        ];
        assert_eq!(select_bot(&mut messages, "Default-Bot"), "Picked-Bot");
    }
}
