#![allow(dead_code)]

use async_trait::async_trait;
use nlq_backend::ax_state::AppState;
use nlq_backend::config::AppConfig;
use nlq_backend::core::orchestrator::{Oracle, OracleError, OracleReply, OracleRequest};
use nlq_backend::models::intent::{ChartSuggestionArgs, SqlToolArgs};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SHOP_SCHEMA: &[&str] = &[
    "CREATE TABLE customers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        city TEXT
    )",
    "CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        category TEXT NOT NULL,
        total REAL NOT NULL,
        ordered_on DATE NOT NULL
    )",
    "CREATE TABLE order_items (
        id INTEGER PRIMARY KEY,
        order_id INTEGER NOT NULL REFERENCES orders,
        sku TEXT NOT NULL,
        quantity INTEGER NOT NULL
    )",
    "INSERT INTO customers (id, name, city) VALUES
        (1, 'Ada', 'London'), (2, 'Grace', 'New York'), (3, 'Linus', NULL)",
    // 25 笔订单，类别 books / games / music 轮换
    "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 25)
     INSERT INTO orders (id, customer_id, category, total, ordered_on)
     SELECT i,
            (i % 3) + 1,
            CASE i % 3 WHEN 0 THEN 'books' WHEN 1 THEN 'games' ELSE 'music' END,
            i * 10.0,
            date('2024-01-01', '+' || i || ' days')
     FROM n",
    "INSERT INTO order_items (id, order_id, sku, quantity) VALUES (1, 1, 'A-1', 2), (2, 1, 'B-7', 1)",
];

/// 临时目录中的 SQLite 数据库文件，随 TempDir 一起删除
pub struct ShopDb {
    _dir: TempDir,
    pub url: String,
}

pub async fn shop_db() -> ShopDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("shop.db").display());

    // 会话连接是只读的，夹具通过单独的可写连接写入
    let options = SqliteConnectOptions::from_str(&url)
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    for statement in SHOP_SCHEMA {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;

    ShopDb { _dir: dir, url }
}

/// 每次调用都返回同一个回复
pub struct FixedOracle {
    reply: OracleReply,
}

#[async_trait]
impl Oracle for FixedOracle {
    async fn call(&self, _: &OracleRequest) -> Result<OracleReply, OracleError> {
        Ok(self.reply.clone())
    }
}

/// 按问题文本挑选回复，未登记的问题按无法回答处理
pub struct ScriptedOracle {
    answers: Vec<(String, OracleReply)>,
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn call(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let reply = self
            .answers
            .iter()
            .find(|(question, _)| *question == request.user_question)
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| OracleReply::CannotAnswer {
                reason: "unscripted question".into(),
            });
        Ok(reply)
    }
}

pub fn scripted_state(answers: &[(&str, &str)]) -> Arc<AppState> {
    let answers = answers
        .iter()
        .map(|(question, sql)| (question.to_string(), sql_reply(sql, None)))
        .collect();
    Arc::new(AppState::new(test_config(), Arc::new(ScriptedOracle { answers })))
}

pub fn sql_reply(sql: &str, chart: Option<&str>) -> OracleReply {
    OracleReply::SqlIntent(SqlToolArgs {
        sql_query: sql.to_string(),
        explanation: "Generated for the test".to_string(),
        tables_used: vec!["orders".to_string()],
        chart_suggestion: chart.map(|c| ChartSuggestionArgs {
            chart_type: Some(c.to_string()),
            reason: None,
            title: None,
        }),
    })
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.limits.max_rows = 10;
    config.limits.timeout = Duration::from_secs(5);
    config.sample_rows_max = 8;
    config.oracle.max_retries = 0;
    config
}

pub fn state_with(config: AppConfig, reply: OracleReply) -> Arc<AppState> {
    Arc::new(AppState::new(config, Arc::new(FixedOracle { reply })))
}

pub fn state(reply: OracleReply) -> Arc<AppState> {
    state_with(test_config(), reply)
}
