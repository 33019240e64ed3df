pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod models;
pub mod service;

pub mod ax_state {
    use crate::config::AppConfig;
    use crate::core::orchestrator::Oracle;
    use crate::service::session::SessionState;
    use std::sync::Arc;

    pub struct AppState {
        pub config: Arc<AppConfig>,
        pub sessions: SessionState,
        pub oracle: Arc<dyn Oracle>,
    }

    impl AppState {
        pub fn new(config: AppConfig, oracle: Arc<dyn Oracle>) -> Self {
            Self {
                config: Arc::new(config),
                sessions: SessionState::new(),
                oracle,
            }
        }
    }
}
