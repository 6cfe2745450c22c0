pub mod app;
pub mod apps;
pub mod attachments;
pub mod bucket;
pub mod config;
pub mod error;
pub mod inet;
pub mod ledger;
pub mod pipeline;
pub mod request;
pub mod symbolicator;
pub mod writer;

#[cfg(test)]
mod test_utils;

pub use app::{create_router, AppState};
pub use config::Config;
pub use error::{IngestError, Result};
