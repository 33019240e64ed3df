use crate::models::intent::ChartType;
use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartSource {
    /// 采纳了模型建议
    Suggested,
    /// 由结果形状推导
    Derived,
}

/// 图表规格，每次查询重新计算，不持久化
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub x_field: Option<String>,
    pub y_fields: Vec<String>,
    pub title: String,
    pub reason: String,
    pub source: ChartSource,
}
