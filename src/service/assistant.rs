//! 对外操作：connect / disconnect / get_schema / answer_question / sample_rows

use crate::ax_state::AppState;
use crate::core::chart_selector::{self, ChartSuggestion};
use crate::core::orchestrator::Orchestrator;
use crate::core::sql_guard;
use crate::error::{AppError, Result};
use crate::models::context::AnswerBundle;
use crate::models::result::QueryResultSet;
use crate::models::schema::SchemaDescription;
use crate::service::session::Session;
use std::sync::Arc;
use tracing::{info, instrument};

/// 空连接串时回退到 DEFAULT_DATABASE_URL
pub async fn connect(state: &AppState, connection_string: Option<&str>) -> Result<Arc<Session>> {
    let url = match connection_string.map(str::trim).filter(|s| !s.is_empty()) {
        Some(url) => url.to_string(),
        None => state.config.default_database_url.clone().ok_or_else(|| {
            AppError::InvalidRequest("connection_string is required".into())
        })?,
    };
    state.sessions.connect(&url, &state.config.summary).await
}

pub async fn disconnect(state: &AppState) -> bool {
    state.sessions.disconnect().await
}

pub async fn get_schema(state: &AppState) -> Result<Arc<SchemaDescription>> {
    state.sessions.schema().await
}

/// 提问 → 意图 → 校验 → 执行 → 图表，严格按序
#[instrument(skip(state))]
pub async fn answer_question(state: &AppState, question: &str) -> Result<AnswerBundle> {
    let session = state.sessions.current().await?;
    let schema = session.schema();
    let limits = state.config.limits;

    let orchestrator = Orchestrator::new(state.oracle.clone(), &state.config);
    let intent = orchestrator.resolve(question, &schema).await?;

    let validated = sql_guard::validate(&intent.sql_query, &limits)?;
    let sql = validated.sql().to_string();
    info!(sql = %sql, "执行生成的 SQL");
    let result = state.sessions.run(&session, validated, &limits).await?;

    let chart = chart_selector::select(&result, &ChartSuggestion::from(&intent), question);
    info!(
        rows = result.row_count,
        chart = %chart.chart_type,
        "问答完成"
    );

    Ok(AnswerBundle {
        question: question.trim().to_string(),
        sql,
        explanation: intent.explanation,
        tables_used: intent.tables_used,
        result,
        chart,
        schema_truncated: schema.truncated,
    })
}

/// 表名必须存在于当前 Schema；limit 缺省为 DEFAULT_SAMPLE_ROWS，并截到上限
#[instrument(skip(state))]
pub async fn sample_rows(state: &AppState, table_name: &str, limit: Option<i64>) -> Result<QueryResultSet> {
    let session = state.sessions.current().await?;
    let schema = session.schema();
    if !schema.has_table(table_name) {
        return Err(AppError::UnknownTable(table_name.to_string()));
    }

    let ceiling = state.config.sample_rows_max.min(state.config.limits.max_rows);
    let limit = match limit {
        Some(n) => u64::try_from(n).unwrap_or(0),
        None => state.config.default_sample_rows,
    }
    .min(ceiling);

    let sql = format!(
        "SELECT * FROM {} LIMIT {}",
        quote_table(table_name, session.backend()),
        limit
    );
    let validated = sql_guard::validate(&sql, &state.config.limits)?;
    state.sessions.run(&session, validated, &state.config.limits).await
}

/// Postgres 中非 public 的表以 schema.table 记录，拆开分别加引号
fn quote_table(name: &str, backend: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) if backend == "postgres" => {
            format!("{}.{}", quote_identifier(schema), quote_identifier(table))
        }
        _ => quote_identifier(name),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
