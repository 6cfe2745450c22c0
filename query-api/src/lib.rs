pub mod aggregator;
pub mod app;
pub mod clickhouse_store;
pub mod config;
pub mod error;
pub mod groups;
pub mod issues;
pub mod journey;
pub mod presign;
pub mod store;

pub use app::{create_router, AppState};
pub use config::Config;
pub use error::{ApiError, Result};
