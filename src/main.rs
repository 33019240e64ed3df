use nlq_backend::api;
use nlq_backend::ax_state::AppState;
use nlq_backend::config::AppConfig;
use nlq_backend::infra::oracle::OpenAiOracle;
use nlq_backend::service::assistant;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nlq_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    if config.oracle.api_key.is_none() {
        warn!("未设置 OPENAI_API_KEY，提问接口将不可用");
    }

    let oracle = Arc::new(OpenAiOracle::new(config.oracle.clone()));
    let addr = config.bind_addr;
    let state = Arc::new(AppState::new(config, oracle));

    // 配置了默认数据源时启动即连接，失败不影响服务启动
    if state.config.default_database_url.is_some() {
        match assistant::connect(&state, None).await {
            Ok(session) => info!(tables = session.schema().tables.len(), "已连接默认数据源"),
            Err(e) => warn!(error = %e, "默认数据源连接失败"),
        }
    }

    let app = api::router(state);

    info!("🚀 NLQ Backend 运行在 http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
