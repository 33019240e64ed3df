pub mod assistant;
pub mod session;
