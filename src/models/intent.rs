use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Table,
    SingleValue,
}

impl ChartType {
    /// 解析模型给出的图表类型，未知取值返回 None (建议仅供参考)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bar" => Some(Self::Bar),
            "line" => Some(Self::Line),
            "pie" => Some(Self::Pie),
            "scatter" => Some(Self::Scatter),
            "table" => Some(Self::Table),
            "single_value" | "single-value" | "kpi" => Some(Self::SingleValue),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Pie => "pie",
            Self::Scatter => "scatter",
            Self::Table => "table",
            Self::SingleValue => "single_value",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型针对单个问题给出的结构化意图，创建后不可变
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct QueryIntent {
    pub sql_query: String,
    pub explanation: String,
    pub tables_used: Vec<String>,
    pub suggested_chart_type: Option<ChartType>,
    pub suggested_chart_reason: Option<String>,
    pub suggested_title: Option<String>,
}

/// `generate_sql` 工具调用的原始参数
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SqlToolArgs {
    #[serde(alias = "query")]
    pub sql_query: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub tables_used: Vec<String>,
    #[serde(default)]
    pub chart_suggestion: Option<ChartSuggestionArgs>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChartSuggestionArgs {
    #[serde(default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}
