pub mod chat;
pub mod session;

use crate::ax_state::AppState;
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(session::root))
        .route("/api/health", get(session::health))
        .route("/api/connect", post(session::connect_database))
        .route("/api/disconnect", post(session::disconnect_database))
        .route("/api/schema", get(session::get_schema))
        .route("/api/sample-data", post(session::sample_data))
        .route("/api/query", post(chat::chat_query))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// "*" 表示放开所有来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "无效的 CORS 来源，忽略");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}
