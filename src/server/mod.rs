pub mod chat_request;
pub mod handlers;
pub mod model_parser;
pub mod streaming;
pub mod tools;
pub(crate) mod util;

use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::providers::{BotClient, PoeClient};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub bot_client: Arc<dyn BotClient>,
}

pub async fn create_app(config: Settings) -> AppResult<Router> {
    let bot_client = Arc::new(PoeClient::new(&config.poe)?);
    tracing::info!(
        "Forwarding to {} (default bot: {})",
        config.poe.base_url,
        config.poe.default_bot
    );
    Ok(router(config, bot_client))
}

/// Builds the routes around any upstream bot client.
pub fn router(config: Settings, bot_client: Arc<dyn BotClient>) -> Router {
    let body_limit = config.server.max_body_bytes;
    let app_state = AppState { config, bot_client };

    let mut app = handlers::routes().with_state(Arc::new(app_state));

    // CORS（便于浏览器端客户端直接调用；令牌仍然必须通过 Authorization 头提供）
    use axum::http::{Method, header};
    use tower_http::cors::{AllowOrigin, CorsLayer};
    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AllowOrigin::any());
    app = app
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    app
}
