use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::BridgeError;
use crate::providers::openai::ChatCompletionChunk;
use crate::providers::streaming::{FragmentStream, StreamFragment, UpstreamFailure};
use crate::server::tools::{AssistantReply, may_be_tool_call};

pub mod common;

pub use common::ResponseFramer;

const SSE_BUFFER: usize = 32;
const DONE_MARKER: &str = "[DONE]";

/// SSE 流式入口：
/// - 先等待首个分片；若上游在产出任何文本前失败，返回普通 JSON 错误（502/504）
/// - 工具模式下，回复开头仍可能是工具调用 JSON 时暂存分片；一旦确定为普通文本即原样转发
/// - 之后切换为 `text/event-stream`，每个分片对应一个 chunk，最后发送结束 chunk 与 `[DONE]`
/// - 客户端断开时中转任务退出并丢弃上游分片流，从而取消上游调用
pub async fn stream_chat_completion(
    mut fragments: FragmentStream,
    framer: ResponseFramer,
    tool_mode: bool,
) -> Result<Response, BridgeError> {
    let mut held = Vec::new();
    let mut held_text = String::new();
    loop {
        let mut fragment = fragments
            .next()
            .await
            .unwrap_or_else(StreamFragment::dropped);
        if let Some(failure) = fragment.error.take() {
            return Err(failure.into());
        }
        held_text.push_str(&fragment.text);
        let is_final = fragment.is_final;
        held.push(fragment);

        if is_final {
            if tool_mode {
                let reply = AssistantReply::from_text(held_text, true);
                if matches!(reply, AssistantReply::ToolCalls(_)) {
                    return Ok(replay_reply(&reply, &framer));
                }
            }
            break;
        }
        if !tool_mode || !may_be_tool_call(&held_text) {
            break;
        }
    }

    let (tx, rx) = mpsc::channel::<Event>(SSE_BUFFER);
    tokio::spawn(relay_fragments(held, fragments, framer, tx));
    Ok(sse_response(ReceiverStream::new(rx)))
}

async fn relay_fragments(
    held: Vec<StreamFragment>,
    mut rest: FragmentStream,
    framer: ResponseFramer,
    tx: mpsc::Sender<Event>,
) {
    let mut sent = 0usize;
    let mut pending = held.into_iter();
    loop {
        let fragment = match pending.next() {
            Some(fragment) => fragment,
            None => tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!(bot = framer.model(), sent, "client went away, abandoning upstream");
                    return;
                }
                next = rest.next() => next.unwrap_or_else(StreamFragment::dropped),
            },
        };

        if !fragment.is_final || !fragment.text.is_empty() {
            let chunk = framer.content(&fragment.text, sent == 0);
            if tx.send(chunk_event(&chunk)).await.is_err() {
                tracing::debug!(bot = framer.model(), sent, "client went away, abandoning upstream");
                return;
            }
            sent += 1;
        }

        if fragment.is_final {
            let closing = match fragment.error {
                None => framer.finish("stop"),
                Some(failure) => {
                    let err = BridgeError::from(failure);
                    tracing::warn!(bot = framer.model(), sent, "upstream failed mid-stream: {}", err);
                    framer.failure(&err)
                }
            };
            if tx.send(chunk_event(&closing)).await.is_ok() {
                let _ = tx.send(done_event()).await;
            }
            return;
        }
    }
}

/// Drains a fragment stream into the full reply text, or the upstream failure that ended it.
pub async fn collect_reply(mut fragments: FragmentStream) -> Result<String, BridgeError> {
    let mut text = String::new();
    while let Some(fragment) = fragments.next().await {
        text.push_str(&fragment.text);
        if fragment.is_final {
            return match fragment.error {
                None => Ok(text),
                Some(failure) => Err(failure.into()),
            };
        }
    }
    Err(UpstreamFailure::incomplete().into())
}

/// SSE rendition of a reply that was already buffered in full.
fn replay_reply(reply: &AssistantReply, framer: &ResponseFramer) -> Response {
    let events: Vec<Event> = framer
        .reply_chunks(reply)
        .iter()
        .map(chunk_event)
        .chain(std::iter::once(done_event()))
        .collect();
    sse_response(futures_util::stream::iter(events))
}

fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = Event> + Send + 'static,
{
    Sse::new(events.map(Ok::<_, Infallible>))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn chunk_event(chunk: &ChatCompletionChunk) -> Event {
    match serde_json::to_string(chunk) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!("failed to serialize chunk: {}", e);
            Event::default().comment("serialization error")
        }
    }
}

fn done_event() -> Event {
    Event::default().data(DONE_MARKER)
}
