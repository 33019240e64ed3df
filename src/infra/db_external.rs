use crate::core::schema_builder::{CatalogRows, RawColumn, RawForeignKey};
use crate::error::{AppError, Result};
use sqlx::{
    postgres::PgPoolOptions,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    PgPool, Row, SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// 建立连接的等待上限
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 外部数据源连接池。每个会话只持有一个连接，语句串行执行
#[derive(Debug)]
pub enum DynamicPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DynamicPool {
    /// 按连接串的 scheme 选择驱动并验证连通性
    pub async fn connect(url: &str) -> Result<Self> {
        let url = url.trim();
        let pool = if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect(url)
                .await
                .map_err(|e| AppError::Connection(e.to_string()))?;
            DynamicPool::Postgres(pool)
        } else if url.starts_with("sqlite:") {
            // 会话连接本身只读，与校验器互为两层防护
            let options = SqliteConnectOptions::from_str(url)
                .map_err(|e| AppError::Connection(e.to_string()))?
                .pragma("query_only", "ON");
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect_with(options)
                .await
                .map_err(|e| AppError::Connection(e.to_string()))?;
            DynamicPool::Sqlite(pool)
        } else {
            return Err(AppError::Connection(
                "unsupported connection string, expected postgres:// or sqlite:".into(),
            ));
        };
        if let Err(e) = pool.ping().await {
            pool.close().await;
            return Err(AppError::Connection(e.to_string()));
        }
        info!(backend = pool.backend(), "外部数据源连接成功");
        Ok(pool)
    }

    async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
        match self {
            DynamicPool::Postgres(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            DynamicPool::Sqlite(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            DynamicPool::Postgres(_) => "postgres",
            DynamicPool::Sqlite(_) => "sqlite",
        }
    }

    pub async fn close(&self) {
        match self {
            DynamicPool::Postgres(p) => p.close().await,
            DynamicPool::Sqlite(p) => p.close().await,
        }
    }

    /// 读取目录信息：表、列 (按序号)、主键、外键
    pub async fn introspect(&self) -> Result<CatalogRows> {
        let catalog = match self {
            DynamicPool::Postgres(p) => introspect_postgres(p).await,
            DynamicPool::Sqlite(p) => introspect_sqlite(p).await,
        }
        .map_err(|e| AppError::Introspection(e.to_string()))?;
        debug!(
            tables = catalog.tables.len(),
            columns = catalog.columns.len(),
            foreign_keys = catalog.foreign_keys.len(),
            "目录读取完成"
        );
        Ok(catalog)
    }
}

// information_schema 的列是 domain 类型，统一转为 text 再解码。
// public 之外的表以 schema.table 命名
fn pg_user_schema(col: &str) -> String {
    format!(
        "{c} NOT IN ('pg_catalog', 'information_schema') AND {c} NOT LIKE 'pg\\_toast%'",
        c = col
    )
}

fn pg_qualified(schema_col: &str, name_col: &str) -> String {
    format!(
        "CASE WHEN {s} = 'public' THEN {n}::text ELSE {s}::text || '.' || {n}::text END",
        s = schema_col,
        n = name_col
    )
}

async fn introspect_postgres(p: &PgPool) -> std::result::Result<CatalogRows, sqlx::Error> {
    let tables = sqlx::query(&format!(
        "SELECT {} FROM information_schema.tables
         WHERE {} AND table_type IN ('BASE TABLE', 'VIEW')
         ORDER BY table_schema, table_name",
        pg_qualified("table_schema", "table_name"),
        pg_user_schema("table_schema"),
    ))
    .fetch_all(p)
    .await?
    .into_iter()
    .map(|r| r.try_get::<String, _>(0))
    .collect::<std::result::Result<Vec<_>, _>>()?;

    let columns = sqlx::query(&format!(
        "SELECT {},
                column_name::text,
                CASE WHEN data_type = 'USER-DEFINED' THEN udt_name::text ELSE data_type::text END,
                is_nullable::text = 'YES'
         FROM information_schema.columns
         WHERE {}
         ORDER BY table_schema, table_name, ordinal_position",
        pg_qualified("table_schema", "table_name"),
        pg_user_schema("table_schema"),
    ))
    .fetch_all(p)
    .await?
    .into_iter()
    .map(|r| {
        Ok(RawColumn {
            table: r.try_get(0)?,
            name: r.try_get(1)?,
            data_type: r.try_get(2)?,
            nullable: r.try_get(3)?,
        })
    })
    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

    let primary_keys: Vec<(String, String)> = sqlx::query(&format!(
        "SELECT {}, kcu.column_name::text
         FROM information_schema.table_constraints tc
         JOIN information_schema.key_column_usage kcu
           ON tc.constraint_name = kcu.constraint_name
          AND tc.table_schema = kcu.table_schema
          AND tc.table_name = kcu.table_name
         WHERE tc.constraint_type = 'PRIMARY KEY' AND {}",
        pg_qualified("tc.table_schema", "tc.table_name"),
        pg_user_schema("tc.table_schema"),
    ))
    .fetch_all(p)
    .await?
    .into_iter()
    .map(|r| Ok((r.try_get(0)?, r.try_get(1)?)))
    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

    // 复合外键按列位置一一配对
    let foreign_keys = sqlx::query(&format!(
        "SELECT {}, sa.attname::text, {}, da.attname::text
         FROM pg_catalog.pg_constraint c
         JOIN pg_catalog.pg_class src ON src.oid = c.conrelid
         JOIN pg_catalog.pg_namespace sn ON sn.oid = src.relnamespace
         JOIN pg_catalog.pg_class dst ON dst.oid = c.confrelid
         JOIN pg_catalog.pg_namespace dn ON dn.oid = dst.relnamespace
         CROSS JOIN LATERAL unnest(c.conkey, c.confkey) AS k(src_att, dst_att)
         JOIN pg_catalog.pg_attribute sa ON sa.attrelid = c.conrelid AND sa.attnum = k.src_att
         JOIN pg_catalog.pg_attribute da ON da.attrelid = c.confrelid AND da.attnum = k.dst_att
         WHERE c.contype = 'f' AND {}
         ORDER BY sn.nspname, src.relname, c.conname",
        pg_qualified("sn.nspname", "src.relname"),
        pg_qualified("dn.nspname", "dst.relname"),
        pg_user_schema("sn.nspname"),
    ))
    .fetch_all(p)
    .await?
    .into_iter()
    .map(|r| {
        Ok(RawForeignKey {
            table: r.try_get(0)?,
            column: r.try_get(1)?,
            referenced_table: r.try_get(2)?,
            referenced_column: Some(r.try_get(3)?),
        })
    })
    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

    Ok(CatalogRows {
        tables,
        columns,
        primary_keys,
        foreign_keys,
    })
}

async fn introspect_sqlite(p: &SqlitePool) -> std::result::Result<CatalogRows, sqlx::Error> {
    let tables: Vec<String> = sqlx::query(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )
    .fetch_all(p)
    .await?
    .into_iter()
    .map(|r| r.try_get::<String, _>(0))
    .collect::<std::result::Result<_, _>>()?;

    let mut catalog = CatalogRows {
        tables: tables.clone(),
        ..Default::default()
    };

    for table in &tables {
        let rows = sqlx::query(
            r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(p)
        .await?;
        for r in rows {
            let name: String = r.try_get(0)?;
            let data_type: Option<String> = r.try_get(1)?;
            let not_null: i64 = r.try_get(2)?;
            let pk: i64 = r.try_get(3)?;
            if pk > 0 {
                catalog.primary_keys.push((table.clone(), name.clone()));
            }
            catalog.columns.push(RawColumn {
                table: table.clone(),
                name,
                data_type: data_type.unwrap_or_default(),
                nullable: not_null == 0 && pk == 0,
            });
        }

        let fks = sqlx::query(r#"SELECT "from", "table", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#)
            .bind(table)
            .fetch_all(p)
            .await?;
        for r in fks {
            catalog.foreign_keys.push(RawForeignKey {
                table: table.clone(),
                column: r.try_get(0)?,
                referenced_table: r.try_get(1)?,
                referenced_column: r.try_get(2)?,
            });
        }
    }

    Ok(catalog)
}
