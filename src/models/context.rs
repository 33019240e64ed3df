use crate::models::chart::ChartSpec;
use crate::models::result::QueryResultSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String, // 用户提问内容
}

#[derive(Debug, Deserialize, Default)]
pub struct ConnectRequest {
    #[serde(default)]
    pub connection_string: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SampleRowsRequest {
    pub table_name: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// 一次问答的完整产出
#[derive(Debug, Serialize, Clone)]
pub struct AnswerBundle {
    pub question: String,
    /// 实际执行的 (已校验、已加 LIMIT 的) SQL
    pub sql: String,
    pub explanation: String,
    pub tables_used: Vec<String>,
    pub result: QueryResultSet,
    pub chart: ChartSpec,
    pub schema_truncated: bool,
}
