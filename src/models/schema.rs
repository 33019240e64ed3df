use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单列元数据 (类型名已归一化为小写)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// 表结构：列顺序即目录顺序
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// 连接级 Schema 模型，每次 connect 全量重建，构建后只读
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SchemaDescription {
    pub tables: BTreeMap<String, TableInfo>,
    pub natural_language_description: String,
    /// 摘要是否因预算被截断 (编排器据此提示模型信息不完整)
    pub truncated: bool,
}

impl SchemaDescription {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// 外键边的扁平列表，按表名字母序
    pub fn relationships(&self) -> Vec<Relationship> {
        self.tables
            .iter()
            .flat_map(|(name, info)| {
                info.foreign_keys.iter().map(move |fk| Relationship {
                    from_table: name.clone(),
                    from_column: fk.column.clone(),
                    to_table: fk.referenced_table.clone(),
                    to_column: fk.referenced_column.clone(),
                })
            })
            .collect()
    }
}
