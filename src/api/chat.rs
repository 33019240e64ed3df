use crate::ax_state::AppState;
use crate::error::AppError;
use crate::models::context::ChatRequest;
use crate::service::assistant;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// 自然语言提问：返回 SQL、说明、结果集与图表规格
pub async fn chat_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<Value>, AppError> {
    let bundle = assistant::answer_question(&state, &payload.query).await?;

    Ok(Json(json!({
        "status": "success",
        "question": bundle.question,
        "sql": bundle.sql,
        "explanation": bundle.explanation,
        "tables_used": bundle.tables_used,
        "data": bundle.result.rows,
        "meta": {
            "columns": bundle.result.columns,
            "row_count": bundle.result.row_count,
            "truncated": bundle.result.truncated,
            "schema_truncated": bundle.schema_truncated,
        },
        "chart": bundle.chart,
    })))
}
