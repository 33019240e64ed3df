pub mod chart;
pub mod context;
pub mod intent;
pub mod result;
pub mod schema;
