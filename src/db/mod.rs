pub mod analyzer;
pub mod db_pool;
pub mod executor;
pub mod schema_manager;
