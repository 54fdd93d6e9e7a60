use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// 令牌优先取查询参数，其次取 `Authorization: Bearer` 头
fn bearer_token<'a>(query: &'a WsQuery, headers: &'a HeaderMap) -> Option<&'a str> {
    query.token.as_deref().or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    })
}

/// 认证在升级之前完成：失败时直接返回 401，不会产生任何在线状态变更
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user = state
        .lifecycle
        .authenticate(bearer_token(&query, &headers))
        .map_err(ApiError::from)?;

    tracing::debug!(user_id = %user.id, "WebSocket 升级");
    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state, user).run()))
}
