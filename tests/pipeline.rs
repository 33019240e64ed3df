mod common;

use common::{scripted_state, shop_db, sql_reply, state, state_with, test_config};
use nlq_backend::core::orchestrator::OracleReply;
use nlq_backend::core::sql_guard::{self, UnsafeReason};
use nlq_backend::error::AppError;
use nlq_backend::models::chart::ChartSource;
use nlq_backend::models::intent::ChartType;
use nlq_backend::models::result::{ScalarValue, ValueKind};
use nlq_backend::service::assistant;
use std::time::Duration;

#[tokio::test]
async fn connect_builds_schema_from_catalog() {
    let db = shop_db().await;
    let state = state(sql_reply("SELECT 1", None));

    let schema = assistant::connect(&state, Some(&db.url)).await.unwrap().schema();
    let names: Vec<&str> = schema.tables.keys().map(|s| s.as_str()).collect();
    assert_eq!(names, vec!["customers", "order_items", "orders"]);

    let orders = schema.table("orders").unwrap();
    let columns: Vec<&str> = orders.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "customer_id", "category", "total", "ordered_on"]);
    assert!(orders.column("id").unwrap().primary_key);
    assert!(!orders.column("total").unwrap().nullable);
    assert_eq!(orders.column("total").unwrap().data_type, "real");

    let relationships = schema.relationships();
    assert!(relationships
        .iter()
        .any(|r| r.from_table == "orders" && r.from_column == "customer_id" && r.to_table == "customers" && r.to_column == "id"));
    // REFERENCES orders 未写列名，解析为被引用表的主键
    assert!(relationships
        .iter()
        .any(|r| r.from_table == "order_items" && r.to_table == "orders" && r.to_column == "id"));

    assert!(schema.natural_language_description.starts_with("3 tables including customers"));
    assert!(!schema.truncated);

    let again = assistant::get_schema(&state).await.unwrap();
    assert_eq!(*again, *schema);
}

#[tokio::test]
async fn sample_rows_respect_requested_limit() {
    let db = shop_db().await;
    let state = state(sql_reply("SELECT 1", None));
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    for (limit, expected) in [(Some(3), 3), (Some(1), 1), (Some(0), 0), (None, 5), (Some(500), 8), (Some(-4), 0)] {
        let result = assistant::sample_rows(&state, "orders", limit).await.unwrap();
        assert_eq!(result.row_count, expected, "limit {:?}", limit);
        assert_eq!(result.rows.len(), expected);
    }

    let result = assistant::sample_rows(&state, "customers", Some(3)).await.unwrap();
    assert_eq!(result.rows[0].get("name"), Some(&ScalarValue::Text("Ada".into())));
    assert_eq!(result.rows[2].get("city"), Some(&ScalarValue::Null));
}

#[tokio::test]
async fn sample_rows_reject_unknown_tables() {
    let db = shop_db().await;
    let state = state(sql_reply("SELECT 1", None));
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    let err = assistant::sample_rows(&state, "orders; DROP TABLE orders", Some(3))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownTable(_)));
}

#[tokio::test]
async fn operations_require_a_connection() {
    let state = state(sql_reply("SELECT 1", None));
    assert!(matches!(assistant::get_schema(&state).await, Err(AppError::NotConnected)));
    assert!(matches!(
        assistant::sample_rows(&state, "orders", None).await,
        Err(AppError::NotConnected)
    ));
    assert!(matches!(
        assistant::answer_question(&state, "how many orders?").await,
        Err(AppError::NotConnected)
    ));
    assert!(!assistant::disconnect(&state).await);
}

#[tokio::test]
async fn executor_caps_rows_and_reports_truncation() {
    let db = shop_db().await;
    let state = state(sql_reply("SELECT 1", None));
    assistant::connect(&state, Some(&db.url)).await.unwrap();
    let session = state.sessions.current().await.unwrap();
    let limits = state.config.limits;

    let query = sql_guard::validate("SELECT * FROM orders ORDER BY id", &limits).unwrap();
    let result = state.sessions.run(&session, query, &limits).await.unwrap();
    assert_eq!(result.row_count, 10);
    assert!(result.truncated);

    let query = sql_guard::validate("SELECT * FROM orders ORDER BY id LIMIT 3", &limits).unwrap();
    let result = state.sessions.run(&session, query, &limits).await.unwrap();
    assert_eq!(result.row_count, 3);
    assert!(!result.truncated);

    let query = sql_guard::validate("SELECT * FROM orders LIMIT 1000", &limits).unwrap();
    let result = state.sessions.run(&session, query, &limits).await.unwrap();
    assert_eq!(result.row_count, 10);
    assert!(result.truncated);

    let query = sql_guard::validate("SELECT COUNT(*) AS n, SUM(total) AS revenue FROM orders", &limits).unwrap();
    let result = state.sessions.run(&session, query, &limits).await.unwrap();
    assert!(!result.truncated);
    assert_eq!(result.rows[0].get("n"), Some(&ScalarValue::Integer(25)));
    assert_eq!(result.rows[0].get("revenue"), Some(&ScalarValue::Float(3250.0)));
    assert_eq!(result.columns[1].kind, ValueKind::Numeric);
}

#[tokio::test]
async fn timed_out_statement_leaves_connection_usable() {
    let db = shop_db().await;
    let mut config = test_config();
    config.limits.timeout = Duration::from_millis(100);
    let state = state_with(config, sql_reply("SELECT 1", None));
    assistant::connect(&state, Some(&db.url)).await.unwrap();
    let session = state.sessions.current().await.unwrap();
    let limits = state.config.limits;

    let slow = sql_guard::validate(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000000)
         SELECT COUNT(*) AS n FROM c",
        &limits,
    )
    .unwrap();
    let err = state.sessions.run(&session, slow, &limits).await.unwrap_err();
    assert!(matches!(err, AppError::ExecutionTimeout(_)), "got {:?}", err);

    let fast = sql_guard::validate("SELECT COUNT(*) AS n FROM orders", &limits).unwrap();
    let result = state.sessions.run(&session, fast, &limits).await.unwrap();
    assert_eq!(result.rows[0].get("n"), Some(&ScalarValue::Integer(25)));
}

#[tokio::test]
async fn question_is_answered_end_to_end() {
    let db = shop_db().await;
    let state = state(sql_reply(
        "SELECT category, SUM(total) AS total FROM orders GROUP BY category ORDER BY category",
        None,
    ));
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    let bundle = assistant::answer_question(&state, " revenue per category ").await.unwrap();
    assert_eq!(bundle.question, "revenue per category");
    assert!(bundle.sql.ends_with("LIMIT 10"));
    assert_eq!(bundle.result.row_count, 3);
    assert_eq!(bundle.chart.chart_type, ChartType::Bar);
    assert_eq!(bundle.chart.x_field.as_deref(), Some("category"));
    assert_eq!(bundle.chart.y_fields, vec!["total".to_string()]);
    assert_eq!(bundle.chart.title, "Results for: revenue per category");
    assert_eq!(bundle.explanation, "Generated for the test");
}

#[tokio::test]
async fn suggested_chart_is_used_when_it_fits() {
    let db = shop_db().await;
    let state = state(sql_reply(
        "SELECT ordered_on, total FROM orders ORDER BY ordered_on LIMIT 5",
        Some("line"),
    ));
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    let bundle = assistant::answer_question(&state, "daily totals").await.unwrap();
    assert_eq!(bundle.chart.chart_type, ChartType::Line);
    assert_eq!(bundle.chart.source, ChartSource::Suggested);
    assert_eq!(bundle.chart.x_field.as_deref(), Some("ordered_on"));
}

#[tokio::test]
async fn unsafe_model_output_is_rejected_before_execution() {
    let db = shop_db().await;
    let state = state(sql_reply("DELETE FROM orders", None));
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    match assistant::answer_question(&state, "remove everything").await {
        Err(AppError::UnsafeQuery { reason, .. }) => assert_eq!(reason, UnsafeReason::NotReadOnly),
        other => panic!("unexpected: {:?}", other.map(|b| b.sql)),
    }
    let result = assistant::sample_rows(&state, "orders", Some(8)).await.unwrap();
    assert_eq!(result.row_count, 8);
}

#[tokio::test]
async fn engine_errors_are_surfaced_and_session_survives() {
    let db = shop_db().await;
    let state = state(sql_reply("SELECT no_such_column FROM orders", None));
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    let err = assistant::answer_question(&state, "q").await.unwrap_err();
    assert!(matches!(err, AppError::Execution(_)), "got {:?}", err);
    assert_eq!(assistant::sample_rows(&state, "customers", None).await.unwrap().row_count, 3);
}

#[tokio::test]
async fn cannot_answer_signal_is_reported() {
    let db = shop_db().await;
    let state = state(OracleReply::CannotAnswer {
        reason: "No weather data".into(),
    });
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    let err = assistant::answer_question(&state, "will it rain?").await.unwrap_err();
    assert!(matches!(err, AppError::Unanswerable(_)));
}

#[tokio::test]
async fn failed_connect_keeps_previous_session() {
    let first = shop_db().await;
    let state = state(sql_reply("SELECT 1", None));
    assistant::connect(&state, Some(&first.url)).await.unwrap();
    let before = state.sessions.current().await.unwrap().id;

    let err = assistant::connect(&state, Some("sqlite:///definitely/not/here.db"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Connection(_)));
    let err = assistant::connect(&state, Some("mysql://localhost/db")).await.unwrap_err();
    assert!(matches!(err, AppError::Connection(_)));
    assert_eq!(state.sessions.current().await.unwrap().id, before);

    let second = shop_db().await;
    assistant::connect(&state, Some(&second.url)).await.unwrap();
    assert_ne!(state.sessions.current().await.unwrap().id, before);

    assert!(assistant::disconnect(&state).await);
    assert!(matches!(assistant::get_schema(&state).await, Err(AppError::NotConnected)));
}

#[tokio::test]
async fn empty_connection_string_needs_a_default() {
    let state = state(sql_reply("SELECT 1", None));
    let err = assistant::connect(&state, Some("  ")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    let db = shop_db().await;
    let mut config = test_config();
    config.default_database_url = Some(db.url.clone());
    let state = state_with(config, sql_reply("SELECT 1", None));
    let session = assistant::connect(&state, None).await.unwrap();
    assert!(session.schema().has_table("orders"));
}

#[tokio::test]
async fn concurrent_questions_share_one_session_safely() {
    let db = shop_db().await;
    let state = scripted_state(&[
        (
            "how far can we count",
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000)
             SELECT COUNT(*) AS n FROM c",
        ),
        ("how many orders", "SELECT COUNT(*) AS n FROM orders"),
    ]);
    assistant::connect(&state, Some(&db.url)).await.unwrap();

    let (slow, fast) = tokio::join!(
        assistant::answer_question(&state, "how far can we count"),
        assistant::answer_question(&state, "how many orders"),
    );
    let slow = slow.unwrap();
    let fast = fast.unwrap();
    assert_eq!(slow.result.rows[0].get("n"), Some(&ScalarValue::Integer(2_000_000)));
    assert_eq!(fast.result.rows[0].get("n"), Some(&ScalarValue::Integer(25)));
    assert_eq!(fast.chart.chart_type, ChartType::SingleValue);
    assert!(state.sessions.current().await.is_ok());
}
