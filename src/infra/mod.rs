pub mod db_external;
pub mod executor;
pub mod oracle;
pub mod utils;
