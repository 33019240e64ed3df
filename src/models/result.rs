use serde::Serialize;
use std::collections::BTreeMap;

/// 结果集中的单元格取值
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// ISO-8601 文本
    Timestamp(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// 按取值本身推断的类别
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Boolean),
            Self::Integer(_) | Self::Float(_) => Some(ValueKind::Numeric),
            Self::Text(_) => Some(ValueKind::Text),
            Self::Timestamp(_) => Some(ValueKind::Temporal),
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Numeric,
    Temporal,
    Boolean,
    Text,
    Other,
}

impl ValueKind {
    /// 由数据库原生类型名归类，按完整类型名匹配 (忽略精度参数)；
    /// INTERVAL、POINT 等无法判断的返回 Other
    pub fn from_db_type(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or_default().trim();
        match base {
            "INT2" | "INT4" | "INT8" | "INT" | "INTEGER" | "SMALLINT" | "BIGINT" | "TINYINT"
            | "MEDIUMINT" | "FLOAT4" | "FLOAT8" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION"
            | "REAL" | "NUMERIC" | "DECIMAL" | "MONEY" => ValueKind::Numeric,
            "DATE" | "TIME" | "TIMETZ" | "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => {
                ValueKind::Temporal
            }
            "BOOL" | "BOOLEAN" => ValueKind::Boolean,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "CHARACTER" | "CHARACTER VARYING"
            | "NVARCHAR" | "CLOB" | "NAME" | "UUID" | "CITEXT" => ValueKind::Text,
            _ => ValueKind::Other,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub db_type: String,
    pub kind: ValueKind,
}

pub type ResultRow = BTreeMap<String, ScalarValue>;

/// 执行器产出的结果集，请求结束即丢弃
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct QueryResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<ResultRow>,
    pub row_count: usize,
    pub truncated: bool,
}

impl QueryResultSet {
    /// 某列的全部取值，按行序
    pub fn values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a ScalarValue> + 'a {
        self.rows.iter().filter_map(move |r| r.get(column))
    }
}
