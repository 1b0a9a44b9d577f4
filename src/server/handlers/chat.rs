use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::BridgeError;
use crate::server::AppState;
use crate::server::chat_request::{TranslatedRequest, parse_chat_request, translate_request};
use crate::server::handlers::auth::ensure_bridge_token;
use crate::server::streaming::{ResponseFramer, collect_reply, stream_chat_completion};
use crate::server::tools::AssistantReply;

/// `POST /v1/chat/completions`
///
/// Authenticates before looking at the body, then hands one Poe call to the bot client.
/// Streaming replies are relayed fragment by fragment; in tool mode only the opening of the
/// reply is held back until it is clearly not a tool-call object.
pub async fn chat_completions(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, BridgeError> {
    ensure_bridge_token(&headers, &app_state.config.credential)?;

    let body = body.map_err(BridgeError::from)?;
    let request = parse_chat_request(&body)?;
    let TranslatedRequest {
        call,
        stream,
        tool_mode,
    } = translate_request(request, &app_state.config)?;

    tracing::info!(
        bot = %call.bot_name,
        turns = call.turns.len(),
        stream,
        tool_mode,
        "forwarding chat completion"
    );

    let framer = ResponseFramer::new(call.bot_name.clone());
    let fragments = app_state.bot_client.stream_reply(call).await;

    if stream {
        return stream_chat_completion(fragments, framer, tool_mode).await;
    }

    let text = collect_reply(fragments).await?;
    let reply = AssistantReply::from_text(text, tool_mode);
    Ok(Json(framer.completion(reply)).into_response())
}
