//! Schema 模型构建
//!
//! 输入为目录查询得到的原始行 (与具体数据库无关)，输出只读的 [`SchemaDescription`]。
//!
//! 摘要截断策略 (确定性)：
//! - 表按名称字母序，列按目录顺序；
//! - 每表最多列出 `max_columns_per_table` 列，其余以 `+k more` 表示；
//! - 依次追加表，直到字符预算不足，剩余以 `… and k more tables` 表示；
//! - 外键关系按字母序在剩余预算内追加，其余以 `(+k more)` 表示；
//! - 发生任何省略时 `truncated = true`。

use crate::config::SummaryPolicy;
use crate::error::{AppError, Result};
use crate::models::schema::{ColumnInfo, ForeignKeyRef, SchemaDescription, TableInfo};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// 省略标记预留的字符数
const TAIL_RESERVE: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawForeignKey {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    /// SQLite 允许省略，指向被引用表的主键
    pub referenced_column: Option<String>,
}

/// 目录查询的原始结果；columns 需已按目录顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRows {
    pub tables: Vec<String>,
    pub columns: Vec<RawColumn>,
    pub primary_keys: Vec<(String, String)>,
    pub foreign_keys: Vec<RawForeignKey>,
}

pub fn build(rows: CatalogRows, policy: &SummaryPolicy) -> Result<SchemaDescription> {
    let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();
    for name in rows.tables {
        if tables.insert(name.clone(), TableInfo::default()).is_some() {
            return Err(AppError::Introspection(format!(
                "table '{}' reported twice by the catalog",
                name
            )));
        }
    }

    for col in rows.columns {
        match tables.get_mut(&col.table) {
            Some(info) if info.column(&col.name).is_none() => info.columns.push(ColumnInfo {
                name: col.name,
                data_type: normalize_type(&col.data_type),
                nullable: col.nullable,
                primary_key: false,
            }),
            Some(_) => debug!(table = %col.table, column = %col.name, "重复列，忽略"),
            None => debug!(table = %col.table, "列所属表不在用户表列表中，忽略"),
        }
    }

    for (table, column) in rows.primary_keys {
        if let Some(col) = tables
            .get_mut(&table)
            .and_then(|t| t.columns.iter_mut().find(|c| c.name == column))
        {
            col.primary_key = true;
        }
    }

    for fk in rows.foreign_keys {
        let referenced_column = match fk.referenced_column {
            Some(c) => Some(c),
            None => single_primary_key(&tables, &fk.referenced_table),
        };
        let Some(referenced_column) = referenced_column else {
            warn!(table = %fk.table, column = %fk.column, "外键缺少可解析的被引用列，丢弃");
            continue;
        };
        let Some(info) = tables.get_mut(&fk.table) else {
            continue;
        };
        // 不变式：外键源列必须存在于本表
        if info.column(&fk.column).is_none() {
            warn!(table = %fk.table, column = %fk.column, "外键源列不存在，丢弃");
            continue;
        }
        let edge = ForeignKeyRef {
            column: fk.column,
            referenced_table: fk.referenced_table,
            referenced_column,
        };
        if !info.foreign_keys.contains(&edge) {
            info.foreign_keys.push(edge);
        }
    }

    let (natural_language_description, truncated) = summarize(&tables, policy);
    info!(
        tables = tables.len(),
        truncated, "Schema 模型构建完成"
    );

    Ok(SchemaDescription {
        tables,
        natural_language_description,
        truncated,
    })
}

fn single_primary_key(tables: &BTreeMap<String, TableInfo>, table: &str) -> Option<String> {
    let info = tables.get(table)?;
    let mut keys = info.primary_keys();
    match (keys.next(), keys.next()) {
        (Some(pk), None) => Some(pk.name.clone()),
        _ => None,
    }
}

/// 小写、合并空白；空类型记为 unknown
pub fn normalize_type(raw: &str) -> String {
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

/// 生成自然语言摘要，返回 (摘要, 是否截断)
pub fn summarize(tables: &BTreeMap<String, TableInfo>, policy: &SummaryPolicy) -> (String, bool) {
    let count = tables.len();
    if count == 0 {
        return ("The database has no user tables.".to_string(), false);
    }

    let mut truncated = false;
    let mut text = format!(
        "{} table{} including ",
        count,
        if count == 1 { "" } else { "s" }
    );

    let mut listed = 0;
    for (name, info) in tables {
        let names: Vec<&str> = info.columns.iter().map(|c| c.name.as_str()).collect();
        let sep = if listed == 0 { "" } else { ", " };
        // 为表与关系两处省略标记都留出空间
        let room = policy
            .max_chars
            .saturating_sub(text.len() + sep.len() + 2 * TAIL_RESERVE);

        let mut shown = names.len().min(policy.max_columns_per_table);
        let mut part = table_part(name, &names, shown);
        if part.len() > room {
            if listed > 0 {
                break;
            }
            // 第一张表也放不下时缩减列清单
            while shown > 0 && part.len() > room {
                shown -= 1;
                part = table_part(name, &names, shown);
            }
            if part.len() > room {
                break;
            }
        }
        if shown < names.len() {
            truncated = true;
        }
        text.push_str(sep);
        text.push_str(&part);
        listed += 1;
    }
    if listed < count {
        text.push_str(&format!(" … and {} more tables", count - listed));
        truncated = true;
    }

    let edges: Vec<String> = tables
        .iter()
        .flat_map(|(name, info)| {
            info.foreign_keys.iter().map(move |fk| {
                format!(
                    "{}.{} → {}.{}",
                    name, fk.column, fk.referenced_table, fk.referenced_column
                )
            })
        })
        .collect();
    if !edges.is_empty() {
        let mut shown = 0;
        let mut rel = String::from(", with relationships ");
        for edge in &edges {
            let sep = if shown == 0 { "" } else { "; " };
            if text.len() + rel.len() + sep.len() + edge.len() + TAIL_RESERVE > policy.max_chars {
                break;
            }
            rel.push_str(sep);
            rel.push_str(edge);
            shown += 1;
        }
        if shown > 0 {
            text.push_str(&rel);
        }
        if shown < edges.len() {
            text.push_str(&format!(" (+{} more relationships)", edges.len() - shown));
            truncated = true;
        }
    }
    text.push('.');
    (text, truncated)
}

/// name (c1, c2, +k more)
fn table_part(name: &str, columns: &[&str], shown: usize) -> String {
    let mut listed: Vec<String> = columns[..shown].iter().map(|c| c.to_string()).collect();
    if shown < columns.len() {
        listed.push(format!("+{} more", columns.len() - shown));
    }
    format!("{} ({})", name, listed.join(", "))
}

/// 提示词中的结构化表/列清单，同样受字符预算约束
pub fn render_listing(schema: &SchemaDescription, max_chars: usize) -> (String, bool) {
    let mut out = String::new();
    let mut listed = 0;
    for (name, info) in &schema.tables {
        let columns: Vec<String> = info
            .columns
            .iter()
            .map(|c| {
                let mut s = format!("{} {}", c.name, c.data_type);
                if c.primary_key {
                    s.push_str(" PK");
                }
                if !c.nullable {
                    s.push_str(" NOT NULL");
                }
                s
            })
            .collect();
        let mut line = format!("Table '{}': {}", name, columns.join(", "));
        if !info.foreign_keys.is_empty() {
            let fks: Vec<String> = info
                .foreign_keys
                .iter()
                .map(|fk| format!("{} -> {}.{}", fk.column, fk.referenced_table, fk.referenced_column))
                .collect();
            line.push_str(&format!(" (Foreign keys: {})", fks.join("; ")));
        }
        if out.len() + line.len() + 1 + TAIL_RESERVE > max_chars && listed > 0 {
            break;
        }
        out.push_str(&line);
        out.push('\n');
        listed += 1;
    }
    let truncated = listed < schema.tables.len();
    if truncated {
        out.push_str(&format!("… {} more tables not shown\n", schema.tables.len() - listed));
    }
    (out, truncated)
}
