use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{RequestBuilder, Url, header::ACCEPT};
use reqwest_eventsource::{Event, RequestBuilderExt, retry};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::PoeConfig;
use crate::error::{BridgeError, Result};
use crate::http_client::upstream_client;
use crate::providers::streaming::{
    BotClient, FragmentStream, StreamFragment, UpstreamCallSpec, UpstreamFailure,
};

use super::types::{BotEvent, QueryRequest};

const MAX_DETAIL_CHARS: usize = 500;

/// Streams replies from the Poe bot API.
pub struct PoeClient {
    http: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
    fragment_buffer: usize,
}

impl PoeClient {
    pub fn new(cfg: &PoeConfig) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| BridgeError::Config(format!("invalid poe.base_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::Config(format!(
                "poe.base_url cannot carry a path: {}",
                cfg.base_url
            )));
        }
        Ok(Self {
            http: upstream_client(cfg)?,
            base_url,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            fragment_buffer: cfg.fragment_buffer.max(1),
        })
    }

    #[cfg(test)]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn bot_url(&self, bot_name: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("bot").push(bot_name);
        }
        url
    }
}

#[async_trait]
impl BotClient for PoeClient {
    async fn stream_reply(&self, call: UpstreamCallSpec) -> FragmentStream {
        let (tx, rx) = mpsc::channel(self.fragment_buffer);
        let request = self
            .http
            .post(self.bot_url(&call.bot_name))
            .bearer_auth(&call.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&QueryRequest::from_call(&call));
        let deadline = Instant::now() + self.request_timeout;

        tracing::debug!(bot = %call.bot_name, turns = call.turns.len(), "Opening Poe stream");
        tokio::spawn(pump_bot_events(request, call.bot_name, deadline, tx));
        Box::pin(ReceiverStream::new(rx))
    }
}

/// Text already handed downstream, kept so `replace_response` can be turned into an append.
#[derive(Default)]
struct ReplyText {
    produced: String,
}

impl ReplyText {
    fn append(&mut self, text: String) -> String {
        self.produced.push_str(&text);
        text
    }

    /// Returns the new suffix when `text` extends what was produced; `None` if it would rewrite it.
    fn replace(&mut self, text: String) -> Option<String> {
        let suffix = text.strip_prefix(self.produced.as_str())?.to_string();
        self.produced = text;
        Some(suffix)
    }
}

async fn pump_bot_events(
    request: RequestBuilder,
    bot: String,
    deadline: Instant,
    tx: mpsc::Sender<StreamFragment>,
) {
    let mut es = match request.eventsource() {
        Ok(es) => es,
        Err(e) => {
            tracing::error!(bot = %bot, "Failed to open eventsource: {}", e);
            let failure =
                UpstreamFailure::unavailable(format!("could not open stream to bot '{}': {}", bot, e));
            let _ = tx.send(StreamFragment::failed(failure)).await;
            return;
        }
    };
    es.set_retry_policy(Box::new(retry::Never));

    let mut reply = ReplyText::default();
    let mut delivered = 0usize;
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                tracing::info!(bot = %bot, delivered, "Client went away, abandoning upstream call");
                break;
            }
            next = tokio::time::timeout_at(deadline, es.next()) => next,
        };

        let fragment = match next {
            Err(_) => StreamFragment::failed(UpstreamFailure::timeout(format!(
                "bot '{}' did not finish within the request deadline",
                bot
            ))),
            Ok(None) => StreamFragment::dropped(),
            Ok(Some(Ok(Event::Open))) => continue,
            Ok(Some(Ok(Event::Message(msg)))) => match BotEvent::decode(&msg.event, &msg.data) {
                BotEvent::Text(text) => StreamFragment::text(reply.append(text)),
                BotEvent::ReplaceResponse(text) => match reply.replace(text) {
                    Some(suffix) if !suffix.is_empty() => StreamFragment::text(suffix),
                    Some(_) => continue,
                    None => {
                        tracing::warn!(bot = %bot, "Dropping replace_response that rewrites text already sent");
                        continue;
                    }
                },
                BotEvent::Done => StreamFragment::done(),
                BotEvent::Error {
                    text,
                    allow_retry,
                    error_type,
                } => StreamFragment::failed(event_failure(&bot, &text, allow_retry, error_type)),
                BotEvent::Malformed(detail) => StreamFragment::failed(
                    UpstreamFailure::unavailable(format!(
                        "bot '{}' sent a malformed event: {}",
                        bot, detail
                    )),
                ),
                BotEvent::Ignored => {
                    tracing::debug!(bot = %bot, event = %msg.event, "Ignoring bot event");
                    continue;
                }
            },
            Ok(Some(Err(e))) => StreamFragment::failed(classify_stream_error(e, &bot).await),
        };

        if let Some(failure) = &fragment.error {
            tracing::warn!(bot = %bot, delivered, "Upstream call failed: {}", failure.message);
        }
        let is_final = fragment.is_final;
        if tx.send(fragment).await.is_err() {
            tracing::info!(bot = %bot, delivered, "Client went away, abandoning upstream call");
            break;
        }
        if is_final {
            tracing::debug!(bot = %bot, delivered, "Poe stream finished");
            break;
        }
        delivered += 1;
    }

    es.close();
}

fn event_failure(
    bot: &str,
    text: &str,
    allow_retry: bool,
    error_type: Option<String>,
) -> UpstreamFailure {
    let message = match error_type {
        Some(kind) => format!("Poe bot '{}' returned an error ({}): {}", bot, kind, text),
        None => format!("Poe bot '{}' returned an error: {}", bot, text),
    };
    if allow_retry {
        UpstreamFailure::unavailable(message)
    } else {
        UpstreamFailure::rejected(message)
    }
}

async fn classify_stream_error(err: reqwest_eventsource::Error, bot: &str) -> UpstreamFailure {
    use reqwest_eventsource::Error;

    match err {
        Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            let detail = error_detail(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("no detail").to_string());
            let message = format!(
                "Poe bot '{}' call failed with HTTP {}: {}",
                bot,
                status.as_u16(),
                detail
            );
            if status.is_server_error() {
                UpstreamFailure::unavailable(message)
            } else {
                UpstreamFailure::rejected(message)
            }
        }
        Error::InvalidContentType(content_type, response) => {
            let body = response.text().await.unwrap_or_default();
            let detail = error_detail(&body)
                .unwrap_or_else(|| format!("unexpected content type {:?}", content_type));
            UpstreamFailure::rejected(format!(
                "Poe bot '{}' did not return an event stream: {}",
                bot, detail
            ))
        }
        Error::StreamEnded => UpstreamFailure::unavailable(format!(
            "stream from bot '{}' ended without a completion signal",
            bot
        )),
        Error::Transport(e) if e.is_timeout() => {
            UpstreamFailure::timeout(format!("timed out talking to bot '{}': {}", bot, e))
        }
        Error::Transport(e) => {
            UpstreamFailure::unavailable(format!("network error talking to bot '{}': {}", bot, e))
        }
        other => UpstreamFailure::unavailable(format!("stream error from bot '{}': {}", bot, other)),
    }
}

/// Best human-readable reason from an upstream error body.
fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        for key in ["detail", "text", "message"] {
            if let Some(s) = v.get(key).and_then(Value::as_str) {
                return Some(s.to_string());
            }
        }
        if let Some(s) = v.get("error").and_then(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .or_else(|| e.as_str())
        }) {
            return Some(s.to_string());
        }
    }
    Some(trimmed.chars().take(MAX_DETAIL_CHARS).collect())
}
