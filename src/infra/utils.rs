use crate::models::result::{ColumnMeta, ResultRow, ScalarValue, ValueKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use sqlx::{postgres::PgRow, sqlite::SqliteRow, Column, Row, TypeInfo, ValueRef};
use std::collections::HashSet;

/// 列元数据；重名列追加 _2、_3 后缀，保证行内键唯一
pub fn column_metas<R: Row>(row: &R) -> Vec<ColumnMeta> {
    let mut seen = HashSet::new();
    row.columns()
        .iter()
        .map(|col| {
            let base = col.name().to_string();
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            let db_type = col.type_info().name().to_string();
            ColumnMeta {
                name,
                kind: ValueKind::from_db_type(&db_type),
                db_type,
            }
        })
        .collect()
}

pub fn pg_row_to_values(row: &PgRow, columns: &[ColumnMeta]) -> ResultRow {
    let mut map = ResultRow::new();

    for (idx, meta) in columns.iter().enumerate() {
        // 获取数据库原生类型名，如 "INT4", "NUMERIC"
        let val = match meta.db_type.as_str() {
            "INT2" => {
                let v: Option<i16> = row.try_get(idx).unwrap_or(None);
                v.map(|v| ScalarValue::Integer(v.into()))
            }
            "INT4" => {
                let v: Option<i32> = row.try_get(idx).unwrap_or(None);
                v.map(|v| ScalarValue::Integer(v.into()))
            }
            "INT8" => {
                let v: Option<i64> = row.try_get(idx).unwrap_or(None);
                v.map(ScalarValue::Integer)
            }
            "FLOAT4" => {
                let v: Option<f32> = row.try_get(idx).unwrap_or(None);
                v.map(|v| ScalarValue::Float(v.into()))
            }
            "FLOAT8" => {
                let v: Option<f64> = row.try_get(idx).unwrap_or(None);
                v.map(ScalarValue::Float)
            }
            "NUMERIC" => {
                let v: Option<rust_decimal::Decimal> = row.try_get(idx).unwrap_or(None);
                // 图表需要数值，这里转为 f64
                v.and_then(|d| d.to_f64()).map(ScalarValue::Float)
            }
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                let v: Option<String> = row.try_get(idx).unwrap_or(None);
                v.map(ScalarValue::Text)
            }
            "BOOL" => {
                let v: Option<bool> = row.try_get(idx).unwrap_or(None);
                v.map(ScalarValue::Bool)
            }
            "DATE" => {
                let v: Option<NaiveDate> = row.try_get(idx).unwrap_or(None);
                v.map(|d| ScalarValue::Timestamp(d.to_string()))
            }
            "TIME" => {
                let v: Option<NaiveTime> = row.try_get(idx).unwrap_or(None);
                v.map(|t| ScalarValue::Timestamp(t.to_string()))
            }
            "TIMESTAMP" => {
                let v: Option<NaiveDateTime> = row.try_get(idx).unwrap_or(None);
                v.map(|dt| ScalarValue::Timestamp(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            }
            "TIMESTAMPTZ" => {
                let v: Option<DateTime<Utc>> = row.try_get(idx).unwrap_or(None);
                v.map(|dt| ScalarValue::Timestamp(dt.to_rfc3339()))
            }
            "UUID" => {
                let v: Option<uuid::Uuid> = row.try_get(idx).unwrap_or(None);
                v.map(|u| ScalarValue::Text(u.to_string()))
            }
            "JSON" | "JSONB" => {
                let v: Option<serde_json::Value> = row.try_get(idx).unwrap_or(None);
                v.map(|j| ScalarValue::Text(j.to_string()))
            }
            other => {
                // 对于未知类型，尝试转为字符串
                match row.try_get::<Option<String>, _>(idx) {
                    Ok(v) => v.map(ScalarValue::Text),
                    Err(_) if is_null(row, idx) => None,
                    Err(_) => Some(ScalarValue::Text(format!("<{}>", other.to_lowercase()))),
                }
            }
        };

        map.insert(meta.name.clone(), val.unwrap_or(ScalarValue::Null));
    }

    map
}

fn is_null(row: &PgRow, idx: usize) -> bool {
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

/// SQLite 按取值的实际存储类型解码；声明为 BOOLEAN 的整数列转为布尔
pub fn sqlite_row_to_values(row: &SqliteRow, columns: &[ColumnMeta]) -> ResultRow {
    let mut map = ResultRow::new();

    for (idx, meta) in columns.iter().enumerate() {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if !raw.is_null() => raw.type_info().name().to_string(),
            _ => "NULL".to_string(),
        };
        let val = match storage.as_str() {
            "INTEGER" => {
                let v: Option<i64> = row.try_get(idx).unwrap_or(None);
                v.map(|v| {
                    if meta.kind == ValueKind::Boolean {
                        ScalarValue::Bool(v != 0)
                    } else {
                        ScalarValue::Integer(v)
                    }
                })
            }
            "REAL" => {
                let v: Option<f64> = row.try_get(idx).unwrap_or(None);
                v.map(ScalarValue::Float)
            }
            "TEXT" => {
                let v: Option<String> = row.try_get(idx).unwrap_or(None);
                v.map(|s| {
                    if meta.kind == ValueKind::Temporal {
                        ScalarValue::Timestamp(s)
                    } else {
                        ScalarValue::Text(s)
                    }
                })
            }
            "BLOB" => {
                let v: Option<Vec<u8>> = row.try_get(idx).unwrap_or(None);
                v.map(|b| ScalarValue::Text(format!("<{} bytes>", b.len())))
            }
            _ => None,
        };

        map.insert(meta.name.clone(), val.unwrap_or(ScalarValue::Null));
    }

    map
}

/// 表达式列没有声明类型，用第一个非空值补全类别
pub fn refine_kinds(columns: &mut [ColumnMeta], rows: &[ResultRow]) {
    for meta in columns.iter_mut().filter(|m| m.kind == ValueKind::Other) {
        if let Some(kind) = rows
            .iter()
            .filter_map(|r| r.get(&meta.name))
            .find_map(|v| v.kind())
        {
            meta.kind = kind;
        }
    }
}
