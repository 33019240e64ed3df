//! 会话：一个外部连接 + 该连接上构建的 Schema 模型
//!
//! 会话状态作为显式对象传递；同一时间只有一个活动会话，connect 原子替换。

use crate::config::{QueryLimits, SummaryPolicy};
use crate::core::schema_builder;
use crate::core::sql_guard::ValidatedQuery;
use crate::error::{AppError, Result};
use crate::infra::db_external::DynamicPool;
use crate::infra::executor;
use crate::models::result::QueryResultSet;
use crate::models::schema::SchemaDescription;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pool: DynamicPool,
    schema: Arc<SchemaDescription>,
    /// 同一连接上一次只执行一条语句
    gate: Mutex<()>,
}

impl Session {
    /// 连接并内省；任一步失败都不会留下半初始化的会话
    pub async fn open(url: &str, policy: &SummaryPolicy) -> Result<Self> {
        let pool = DynamicPool::connect(url).await?;
        let schema = match pool.introspect().await {
            Ok(catalog) => schema_builder::build(catalog, policy),
            Err(e) => Err(e),
        };
        let schema = match schema {
            Ok(s) => s,
            Err(e) => {
                pool.close().await;
                return Err(e);
            }
        };

        let session = Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            pool,
            schema: Arc::new(schema),
            gate: Mutex::new(()),
        };
        info!(
            session_id = %session.id,
            backend = session.pool.backend(),
            tables = session.schema.tables.len(),
            "会话已建立"
        );
        Ok(session)
    }

    pub fn schema(&self) -> Arc<SchemaDescription> {
        self.schema.clone()
    }

    pub fn backend(&self) -> &'static str {
        self.pool.backend()
    }

    /// 串行执行已校验的语句
    async fn run(&self, query: ValidatedQuery, limits: &QueryLimits) -> Result<QueryResultSet> {
        let _guard = self.gate.lock().await;
        executor::execute(&self.pool, query, limits).await
    }

    async fn close(self) {
        self.pool.close().await;
        info!(session_id = %self.id, "会话已关闭");
    }
}

#[derive(Default)]
pub struct SessionState {
    current: RwLock<Option<Arc<Session>>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新会话完全建立后才替换旧会话；失败时旧会话保持不变
    pub async fn connect(&self, url: &str, policy: &SummaryPolicy) -> Result<Arc<Session>> {
        let session = Arc::new(Session::open(url, policy).await?);
        let previous = self.current.write().await.replace(session.clone());
        if let Some(old) = previous {
            retire(old).await;
        }
        Ok(session)
    }

    /// 返回之前是否存在活动会话
    pub async fn disconnect(&self) -> bool {
        let previous = self.current.write().await.take();
        match previous {
            Some(old) => {
                retire(old).await;
                true
            }
            None => false,
        }
    }

    pub async fn current(&self) -> Result<Arc<Session>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(AppError::NotConnected)
    }

    pub async fn schema(&self) -> Result<Arc<SchemaDescription>> {
        Ok(self.current().await?.schema())
    }

    /// 在给定会话上执行；连接已断开且该会话仍是当前会话时，回到未连接状态
    pub async fn run(
        &self,
        session: &Session,
        query: ValidatedQuery,
        limits: &QueryLimits,
    ) -> Result<QueryResultSet> {
        let result = session.run(query, limits).await;
        if let Err(AppError::ConnectionLost(reason)) = &result {
            let mut current = self.current.write().await;
            // 期间可能已切换到新会话，只清除同一个会话
            if current.as_ref().is_some_and(|c| c.id == session.id) {
                current.take();
                warn!(session_id = %session.id, reason = %reason, "连接已断开，会话失效");
            }
        }
        result
    }
}

async fn retire(session: Arc<Session>) {
    match Arc::try_unwrap(session) {
        Ok(session) => session.close().await,
        // 仍有进行中的请求持有该会话，最后一个引用释放时连接随之关闭
        Err(shared) => debug!(session_id = %shared.id, "会话仍在使用，延迟释放"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sql_guard;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn numbers_db() -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("numbers.db").display());
        let options = SqliteConnectOptions::from_str(&url)
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE numbers (n INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO numbers (n) VALUES (1), (2), (3)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
        (dir, url)
    }

    fn limits() -> QueryLimits {
        QueryLimits {
            max_rows: 10,
            timeout: Duration::from_secs(5),
        }
    }

    fn select_numbers() -> ValidatedQuery {
        sql_guard::validate("SELECT n FROM numbers", &limits()).unwrap()
    }

    #[tokio::test]
    async fn lost_connection_returns_to_disconnected() {
        let (_dir, url) = numbers_db().await;
        let state = SessionState::new();
        let session = state.connect(&url, &SummaryPolicy::default()).await.unwrap();

        let ok = state.run(&session, select_numbers(), &limits()).await.unwrap();
        assert_eq!(ok.row_count, 3);

        session.pool.close().await;
        let err = state.run(&session, select_numbers(), &limits()).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionLost(_)), "{:?}", err);
        assert!(matches!(state.current().await, Err(AppError::NotConnected)));
    }

    #[tokio::test]
    async fn stale_session_failure_keeps_the_newer_session() {
        let (_first_dir, first) = numbers_db().await;
        let (_second_dir, second) = numbers_db().await;
        let state = SessionState::new();
        let old = state.connect(&first, &SummaryPolicy::default()).await.unwrap();
        let new = state.connect(&second, &SummaryPolicy::default()).await.unwrap();

        old.pool.close().await;
        let err = state.run(&old, select_numbers(), &limits()).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionLost(_)));
        assert_eq!(state.current().await.unwrap().id, new.id);
    }
}
