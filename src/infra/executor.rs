//! 只读执行：行数上限、语句超时、失败后连接仍可复用
//!
//! - Postgres：每条语句独立的只读事务 + `SET LOCAL statement_timeout`，结束后一律回滚；
//! - SQLite：会话连接为 `query_only`，超时通过 progress handler 中断；
//! - 外层再套一层 tokio 超时兜底。

use crate::config::QueryLimits;
use crate::core::sql_guard::ValidatedQuery;
use crate::error::{AppError, Result};
use crate::infra::db_external::DynamicPool;
use crate::infra::utils::{column_metas, pg_row_to_values, refine_kinds, sqlite_row_to_values};
use crate::models::result::{ColumnMeta, QueryResultSet, ResultRow};
use futures::{Stream, TryStreamExt};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{PgPool, SqlitePool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// 外层兜底超时相对语句超时的宽限
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// SQLite 每执行多少条虚拟机指令检查一次截止时间
const PROGRESS_OPS: i32 = 1_000;

/// Postgres 取消语句的 SQLSTATE
const QUERY_CANCELED: &str = "57014";

struct Fetched {
    columns: Vec<ColumnMeta>,
    rows: Vec<ResultRow>,
    more: bool,
}

#[instrument(skip_all, fields(backend = pool.backend()))]
pub async fn execute(
    pool: &DynamicPool,
    query: ValidatedQuery,
    limits: &QueryLimits,
) -> Result<QueryResultSet> {
    let cap = usize::try_from(query.row_limit().min(limits.max_rows)).unwrap_or(usize::MAX);
    let started = Instant::now();

    let run = async {
        match pool {
            DynamicPool::Postgres(p) => run_postgres(p, query.sql(), cap, limits.timeout).await,
            DynamicPool::Sqlite(p) => run_sqlite(p, query.sql(), cap, limits.timeout).await,
        }
    };
    let fetched = match tokio::time::timeout(limits.timeout + TIMEOUT_GRACE, run).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("语句超时 (外层兜底)");
            return Err(AppError::ExecutionTimeout(limits.timeout));
        }
    };

    let Fetched {
        mut columns,
        rows,
        more,
    } = fetched;
    refine_kinds(&mut columns, &rows);
    let row_count = rows.len();
    // 引擎返回了超出上限的行，或结果恰好填满了校验器追加/收紧的 LIMIT
    let truncated = more
        || (query.limit_imposed() && u64::try_from(row_count).unwrap_or(u64::MAX) == query.row_limit());

    info!(
        rows = row_count,
        truncated,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "查询执行完成"
    );
    Ok(QueryResultSet {
        columns,
        rows,
        row_count,
        truncated,
    })
}

/// 逐行读取，最多物化 cap 行；多读到的第一行只用于标记截断，随后丢弃结果流
async fn collect<R, S>(
    mut stream: S,
    cap: usize,
    describe: fn(&R) -> Vec<ColumnMeta>,
    decode: fn(&R, &[ColumnMeta]) -> ResultRow,
) -> std::result::Result<Fetched, sqlx::Error>
where
    S: Stream<Item = std::result::Result<R, sqlx::Error>> + Unpin,
{
    let mut columns: Option<Vec<ColumnMeta>> = None;
    let mut rows = Vec::new();
    let mut more = false;
    while let Some(row) = stream.try_next().await? {
        let metas = columns.get_or_insert_with(|| describe(&row));
        if rows.len() == cap {
            more = true;
            break;
        }
        rows.push(decode(&row, metas));
    }
    Ok(Fetched {
        columns: columns.unwrap_or_default(),
        rows,
        more,
    })
}

async fn run_postgres(pool: &PgPool, sql: &str, cap: usize, timeout: Duration) -> Result<Fetched> {
    let mut tx = pool.begin().await.map_err(engine_error)?;
    sqlx::query("SET TRANSACTION READ ONLY")
        .execute(&mut *tx)
        .await
        .map_err(engine_error)?;
    sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1)))
        .execute(&mut *tx)
        .await
        .map_err(engine_error)?;

    let outcome = collect(
        sqlx::query(sql).fetch(&mut *tx),
        cap,
        column_metas::<PgRow>,
        pg_row_to_values,
    )
    .await;

    // 只读事务，无论成败都回滚
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "回滚失败");
    }

    outcome.map_err(|e| {
        let canceled = matches!(
            &e,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED)
        );
        if canceled {
            AppError::ExecutionTimeout(timeout)
        } else {
            engine_error(e)
        }
    })
}

/// 连接层面的失败 (断线、连接池关闭) 单独归类，会话随之失效
fn engine_error(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => AppError::ConnectionLost(e.to_string()),
        _ => AppError::Execution(e.to_string()),
    }
}

async fn run_sqlite(pool: &SqlitePool, sql: &str, cap: usize, timeout: Duration) -> Result<Fetched> {
    let mut conn = pool.acquire().await.map_err(engine_error)?;

    let fired = Arc::new(AtomicBool::new(false));
    let deadline = Instant::now() + timeout;
    {
        let flag = fired.clone();
        let mut handle = conn.lock_handle().await.map_err(engine_error)?;
        handle.set_progress_handler(PROGRESS_OPS, move || {
            if Instant::now() >= deadline {
                flag.store(true, Ordering::SeqCst);
                return false;
            }
            true
        });
    }

    let outcome = collect(
        sqlx::query(sql).fetch(&mut *conn),
        cap,
        column_metas::<SqliteRow>,
        sqlite_row_to_values,
    )
    .await;

    // 连接归还前移除 handler，下一条语句不受影响
    match conn.lock_handle().await {
        Ok(mut handle) => handle.remove_progress_handler(),
        Err(e) => warn!(error = %e, "移除 progress handler 失败"),
    }

    outcome.map_err(|e| {
        if fired.load(Ordering::SeqCst) {
            AppError::ExecutionTimeout(timeout)
        } else {
            engine_error(e)
        }
    })
}
