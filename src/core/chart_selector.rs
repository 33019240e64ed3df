//! 图表选择：模型建议只作参考，最终由结果形状的确定性规则决定

use crate::models::chart::{ChartSource, ChartSpec};
use crate::models::intent::{ChartType, QueryIntent};
use crate::models::result::{ColumnMeta, QueryResultSet, ScalarValue, ValueKind};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// 超过该列数只展示表格
const MAX_CHART_COLUMNS: usize = 6;

static DATE_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("date pattern is valid"));

#[derive(Debug, Clone, Default)]
pub struct ChartSuggestion {
    pub chart_type: Option<ChartType>,
    pub reason: Option<String>,
    pub title: Option<String>,
}

impl From<&QueryIntent> for ChartSuggestion {
    fn from(intent: &QueryIntent) -> Self {
        Self {
            chart_type: intent.suggested_chart_type,
            reason: intent.suggested_chart_reason.clone(),
            title: intent.suggested_title.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Numeric,
    Temporal,
    Categorical,
}

struct Shape<'a> {
    rows: usize,
    columns: Vec<(&'a str, Role)>,
}

impl<'a> Shape<'a> {
    fn of(result: &'a QueryResultSet) -> Self {
        Self {
            rows: result.rows.len(),
            columns: result
                .columns
                .iter()
                .map(|c| (c.name.as_str(), role_of(result, c)))
                .collect(),
        }
    }

    fn with(&self, role: Role) -> Vec<&'a str> {
        self.columns
            .iter()
            .filter(|(_, r)| *r == role)
            .map(|(n, _)| *n)
            .collect()
    }

    fn count(&self, role: Role) -> usize {
        self.columns.iter().filter(|(_, r)| *r == role).count()
    }
}

fn role_of(result: &QueryResultSet, meta: &ColumnMeta) -> Role {
    let mut values = result.values(&meta.name).filter(|v| !v.is_null()).peekable();
    match meta.kind {
        ValueKind::Numeric => Role::Numeric,
        ValueKind::Temporal => Role::Temporal,
        ValueKind::Boolean => Role::Categorical,
        ValueKind::Text => {
            // 文本形式的日期 (如 SQLite 中的 '2024-01-31')
            let date_like = values.peek().is_some()
                && values.all(|v| matches!(v, ScalarValue::Text(s) if DATE_LIKE.is_match(s)));
            if date_like {
                Role::Temporal
            } else {
                Role::Categorical
            }
        }
        ValueKind::Other => match values.next().and_then(|v| v.kind()) {
            Some(ValueKind::Numeric) => Role::Numeric,
            Some(ValueKind::Temporal) => Role::Temporal,
            _ => Role::Categorical,
        },
    }
}

/// 按结果形状与模型建议给出最终图表规格，不会失败，兜底为 table
pub fn select(result: &QueryResultSet, suggestion: &ChartSuggestion, question: &str) -> ChartSpec {
    let shape = Shape::of(result);
    let title = suggestion
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Results for: {}", question.trim()));

    if let Some(kind) = suggestion.chart_type {
        if let Some(mut spec) = build(kind, &shape) {
            debug!(chart = %kind, "采纳模型的图表建议");
            spec.title = title;
            if let Some(reason) = suggestion.reason.as_deref().filter(|r| !r.trim().is_empty()) {
                spec.reason = reason.trim().to_string();
            }
            spec.source = ChartSource::Suggested;
            return spec;
        }
        debug!(chart = %kind, "图表建议与结果形状不符，改用推导规则");
    }

    let mut spec = derive(&shape);
    spec.title = title;
    spec
}

fn derive(shape: &Shape) -> ChartSpec {
    let ncols = shape.columns.len();
    let numeric = shape.count(Role::Numeric);

    if ncols == 1 && shape.rows <= 1 {
        return spec_or_table(ChartType::SingleValue, shape);
    }
    if shape.rows == 0 {
        return table("The query returned no rows");
    }
    if ncols > MAX_CHART_COLUMNS {
        return table("Too many columns to chart");
    }
    if numeric == 0 {
        return table("No numeric column to plot");
    }
    if shape.count(Role::Temporal) > 0 {
        return spec_or_table(ChartType::Line, shape);
    }
    if shape.count(Role::Categorical) > 0 {
        return spec_or_table(ChartType::Bar, shape);
    }
    if numeric == 2 && ncols == 2 {
        return spec_or_table(ChartType::Scatter, shape);
    }
    table("No chart fits this result shape")
}

fn spec_or_table(kind: ChartType, shape: &Shape) -> ChartSpec {
    build(kind, shape).unwrap_or_else(|| table("No chart fits this result shape"))
}

fn table(reason: &str) -> ChartSpec {
    ChartSpec {
        chart_type: ChartType::Table,
        x_field: None,
        y_fields: Vec::new(),
        title: String::new(),
        reason: reason.to_string(),
        source: ChartSource::Derived,
    }
}

/// 形状满足时返回该类型的规格，否则 None
fn build(kind: ChartType, shape: &Shape) -> Option<ChartSpec> {
    let ncols = shape.columns.len();
    let numeric = shape.with(Role::Numeric);
    let temporal = shape.with(Role::Temporal);
    let categorical = shape.with(Role::Categorical);

    let charted = kind != ChartType::Table && kind != ChartType::SingleValue;
    if charted && shape.rows == 0 {
        return None;
    }

    let (x_field, y_fields, reason) = match kind {
        ChartType::Table => (None, Vec::new(), "Tabular view of the result"),
        ChartType::SingleValue => {
            if ncols != 1 || shape.rows > 1 {
                return None;
            }
            (None, vec![shape.columns[0].0], "Single value result")
        }
        ChartType::Bar => {
            let x = categorical.first().or(temporal.first())?;
            if numeric.is_empty() {
                return None;
            }
            (Some(*x), numeric, "Numeric values compared across categories")
        }
        ChartType::Line => {
            let x = temporal.first().or(categorical.first())?;
            if numeric.is_empty() {
                return None;
            }
            (Some(*x), numeric, "Numeric values over time")
        }
        ChartType::Pie => {
            if ncols != 2 || categorical.len() != 1 || numeric.len() != 1 {
                return None;
            }
            (Some(categorical[0]), numeric, "Share of total per category")
        }
        ChartType::Scatter => {
            if ncols != 2 || numeric.len() != 2 {
                return None;
            }
            (Some(numeric[0]), vec![numeric[1]], "Relationship between two measures")
        }
    };

    Some(ChartSpec {
        chart_type: kind,
        x_field: x_field.map(str::to_string),
        y_fields: y_fields.into_iter().map(str::to_string).collect(),
        title: String::new(),
        reason: reason.to_string(),
        source: ChartSource::Derived,
    })
}
