use crate::ax_state::AppState;
use crate::error::AppError;
use crate::models::context::{ConnectRequest, SampleRowsRequest};
use crate::service::assistant;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Natural Language Database Query System",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "connect": "POST /api/connect",
            "disconnect": "POST /api/disconnect",
            "schema": "GET /api/schema",
            "query": "POST /api/query",
            "sample_data": "POST /api/sample-data",
            "health": "GET /api/health",
        }
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let connected = state.sessions.current().await.is_ok();
    Json(json!({ "status": "healthy", "connected": connected }))
}

pub async fn connect_database(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConnectRequest>,
) -> Result<Json<Value>, AppError> {
    let session = assistant::connect(&state, payload.connection_string.as_deref()).await?;
    let schema = session.schema();
    info!(session_id = %session.id, "数据库连接请求处理完成");

    Ok(Json(json!({
        "status": "success",
        "message": format!("Connected to {} database", session.backend()),
        "session_id": session.id,
        "connection_type": session.backend(),
        "connected_at": session.connected_at.to_rfc3339(),
        "schema": *schema,
    })))
}

pub async fn disconnect_database(State(state): State<Arc<AppState>>) -> Json<Value> {
    let was_connected = assistant::disconnect(&state).await;
    Json(json!({
        "status": "success",
        "message": if was_connected { "Disconnected from database" } else { "No active connection" },
    }))
}

pub async fn get_schema(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let schema = assistant::get_schema(&state).await?;
    Ok(Json(json!({ "status": "success", "schema": *schema })))
}

pub async fn sample_data(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SampleRowsRequest>,
) -> Result<Json<Value>, AppError> {
    let result = assistant::sample_rows(&state, &payload.table_name, payload.limit).await?;
    Ok(Json(json!({
        "status": "success",
        "table_name": payload.table_name,
        "data": result.rows,
        "columns": result.columns,
        "row_count": result.row_count,
    })))
}
