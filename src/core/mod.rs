pub mod chart_selector;
pub mod orchestrator;
pub mod schema_builder;
pub mod sql_guard;
