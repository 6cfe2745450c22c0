use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use common_metrics::{serve, setup_metrics_routes};

use query_api::app::{create_router, AppState};
use query_api::clickhouse_store::ClickHouseEventStore;
use query_api::config::Config;
use query_api::presign::S3UrlSigner;

fn setup_tracing(log_format: &str) {
    let log_layer = if log_format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("failed to load configuration from env");
    setup_tracing(&config.log_format);

    let postgres_pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to postgres");

    let events = ClickHouseEventStore::new(&config.clickhouse)
        .await
        .expect("failed to connect to clickhouse");

    let signer = S3UrlSigner::new(&config.attachments).await;

    let state = AppState {
        pg_pool: postgres_pool,
        events: Arc::new(events),
        signer: Arc::new(signer),
    };

    let app = create_router(state);
    let app = setup_metrics_routes(app).expect("failed to install metrics recorder");

    let bind = config.bind();
    tracing::info!("Listening on {}", bind);
    if let Err(e) = serve(app, &bind).await {
        tracing::error!("Server error: {}", e);
    }
}
