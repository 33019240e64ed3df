use crate::error::{AppError, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// 行数上限与语句超时，校验器与执行器共用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub max_rows: u64,
    pub timeout: Duration,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Schema 摘要的截断策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPolicy {
    pub max_chars: usize,
    pub max_columns_per_table: usize,
}

impl Default for SummaryPolicy {
    fn default() -> Self {
        Self {
            max_chars: 4_000,
            max_columns_per_table: 12,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub limits: QueryLimits,
    pub oracle: OracleSettings,
    pub summary: SummaryPolicy,
    pub sample_rows_max: u64,
    pub default_sample_rows: u64,
    pub cors_origins: Vec<String>,
    pub default_database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            limits: QueryLimits::default(),
            oracle: OracleSettings::default(),
            summary: SummaryPolicy::default(),
            sample_rows_max: 100,
            default_sample_rows: 5,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            default_database_url: None,
        }
    }
}

impl AppConfig {
    /// 从进程环境读取 (调用前由 main 先加载 .env)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_rows: u64 = parse_or(&get, "MAX_QUERY_ROWS", defaults.limits.max_rows)?;
        if max_rows == 0 {
            return Err(AppError::Config("MAX_QUERY_ROWS must be at least 1".into()));
        }

        let limits = QueryLimits {
            max_rows,
            timeout: Duration::from_secs(parse_or(&get, "QUERY_TIMEOUT_SECS", 30u64)?),
        };

        let oracle = OracleSettings {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.oracle.base_url),
            model: get("OPENAI_MODEL").unwrap_or(defaults.oracle.model),
            timeout: Duration::from_secs(parse_or(&get, "ORACLE_TIMEOUT_SECS", 60u64)?),
            max_retries: parse_or(&get, "ORACLE_MAX_RETRIES", defaults.oracle.max_retries)?,
            retry_backoff: Duration::from_millis(parse_or(&get, "ORACLE_RETRY_BACKOFF_MS", 500u64)?),
        };

        let summary = SummaryPolicy {
            max_chars: parse_or(&get, "SCHEMA_SUMMARY_MAX_CHARS", defaults.summary.max_chars)?,
            max_columns_per_table: parse_or(
                &get,
                "SCHEMA_SUMMARY_MAX_COLUMNS",
                defaults.summary.max_columns_per_table,
            )?,
        };

        let cors_origins = match get("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", defaults.bind_addr)?,
            limits,
            oracle,
            summary,
            sample_rows_max: parse_or(&get, "SAMPLE_ROWS_MAX", defaults.sample_rows_max)?,
            default_sample_rows: parse_or(&get, "DEFAULT_SAMPLE_ROWS", defaults.default_sample_rows)?,
            cors_origins,
            default_database_url: get("DEFAULT_DATABASE_URL"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
