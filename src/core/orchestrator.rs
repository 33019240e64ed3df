//! 自然语言 → SQL 编排
//!
//! 唯一允许调用语言模型的地方。只产出 [`QueryIntent`]，不执行 SQL。

use crate::config::{AppConfig, SummaryPolicy};
use crate::core::schema_builder::render_listing;
use crate::error::{AppError, Result};
use crate::models::intent::{ChartType, QueryIntent, SqlToolArgs};
use crate::models::schema::SchemaDescription;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// MalformedIntent 中保留的模型原文长度上限
const MAX_EXPLANATION_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OracleRequest {
    pub schema_context: String,
    pub user_question: String,
}

/// 模型的三种回复：生成 SQL、声明无法回答、或给出无法解析的自由文本
#[derive(Debug, Clone)]
pub enum OracleReply {
    SqlIntent(SqlToolArgs),
    CannotAnswer { reason: String },
    Malformed { raw_text: Option<String> },
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle call timed out")]
    Timeout,
    #[error("oracle transport failed: {0}")]
    Transport(String),
    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oracle is not configured: {0}")]
    NotConfigured(String),
}

impl OracleError {
    fn retryable(&self) -> bool {
        !matches!(self, OracleError::NotConfigured(_))
    }
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn call(&self, request: &OracleRequest) -> std::result::Result<OracleReply, OracleError>;
}

pub struct Orchestrator {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
    listing_chars: usize,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, config: &AppConfig) -> Self {
        Self {
            oracle,
            timeout: config.oracle.timeout,
            max_retries: config.oracle.max_retries,
            backoff: config.oracle.retry_backoff,
            listing_chars: listing_budget(&config.summary),
        }
    }

    #[instrument(skip(self, schema), fields(question = %question))]
    pub async fn resolve(&self, question: &str, schema: &SchemaDescription) -> Result<QueryIntent> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidRequest("question must not be empty".into()));
        }

        let request = OracleRequest {
            schema_context: schema_context(schema, self.listing_chars),
            user_question: question.to_string(),
        };

        let mut attempt = 0u32;
        let reply = loop {
            let outcome = match tokio::time::timeout(self.timeout, self.oracle.call(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(OracleError::Timeout),
            };
            match outcome {
                Ok(reply) => break reply,
                Err(e) if e.retryable() && attempt < self.max_retries => {
                    let wait = self.backoff.saturating_mul(1 << attempt.min(16));
                    warn!(attempt, error = %e, "模型调用失败，{}ms 后重试", wait.as_millis());
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "模型调用失败，放弃");
                    return Err(AppError::Oracle(e.to_string()));
                }
            }
        };

        let intent = into_intent(reply)?;
        info!(tables = ?intent.tables_used, "模型返回 SQL 意图");
        Ok(intent)
    }
}

fn listing_budget(policy: &SummaryPolicy) -> usize {
    policy.max_chars.saturating_mul(3)
}

/// 模型的上下文：自然语言摘要 + 结构化表/列清单
pub fn schema_context(schema: &SchemaDescription, listing_chars: usize) -> String {
    let (listing, listing_truncated) = render_listing(schema, listing_chars);
    let mut context = format!("Database summary: {}\n", schema.natural_language_description);
    if schema.truncated || listing_truncated {
        context.push_str(
            "Note: this schema description is partial; some tables or columns are not shown. \
             Only reference tables and columns listed below.\n",
        );
    }
    context.push_str("\nTables:\n");
    context.push_str(&listing);
    context
}

fn into_intent(reply: OracleReply) -> Result<QueryIntent> {
    match reply {
        OracleReply::SqlIntent(args) => {
            let sql = strip_code_fence(&args.sql_query);
            let explanation = args.explanation.trim().to_string();
            if sql.is_empty() {
                return Err(AppError::MalformedIntent {
                    explanation: Some(explanation).filter(|e| !e.is_empty()),
                });
            }
            let explanation = if explanation.is_empty() {
                fallback_explanation(&args.tables_used)
            } else {
                explanation
            };
            let suggestion = args.chart_suggestion.unwrap_or_default();
            let suggested_chart_type = suggestion.chart_type.as_deref().and_then(|raw| {
                let parsed = ChartType::parse(raw);
                if parsed.is_none() {
                    debug!(chart = raw, "未知的图表类型建议，忽略");
                }
                parsed
            });
            Ok(QueryIntent {
                sql_query: sql,
                explanation,
                tables_used: args.tables_used,
                suggested_chart_type,
                suggested_chart_reason: non_empty(suggestion.reason),
                suggested_title: non_empty(suggestion.title),
            })
        }
        OracleReply::CannotAnswer { reason } => {
            let reason = reason.trim();
            Err(AppError::Unanswerable(if reason.is_empty() {
                "the model could not map the question to this schema".to_string()
            } else {
                reason.to_string()
            }))
        }
        OracleReply::Malformed { raw_text } => {
            warn!("模型未返回结构化调用");
            Err(AppError::MalformedIntent {
                explanation: non_empty(raw_text)
                    .map(|t| t.chars().take(MAX_EXPLANATION_CHARS).collect()),
            })
        }
    }
}

/// 模型未给出说明时，按涉及的表生成一句
fn fallback_explanation(tables_used: &[String]) -> String {
    let tables: Vec<&str> = tables_used
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if tables.is_empty() {
        "Read-only query generated from the question".to_string()
    } else {
        format!("Query over {}", tables.join(", "))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 去掉模型偶尔包裹的 ```sql ... ``` 代码块
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .trim_end_matches("```")
        .trim()
        .to_string()
}
