use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use common_geoip::GeoIpClient;
use common_metrics::setup_metrics_routes;

use ingest::app::{create_router, AppState};
use ingest::attachments::S3AttachmentStore;
use ingest::bucket::BucketOptions;
use ingest::config::Config;
use ingest::ledger::Ledger;
use ingest::pipeline::{IngestSettings, Pipeline};
use ingest::symbolicator::{HttpSymbolicator, Symbolicate};
use ingest::writer::ClickHouseEventWriter;

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

async fn listen(app: Router, bind: String) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Listening on {}", bind);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
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

    let geoip = GeoIpClient::new(PathBuf::from(&config.maxmind_db_path))
        .expect("failed to open geoip database");

    let writer = ClickHouseEventWriter::new(&config.clickhouse)
        .await
        .expect("failed to connect to clickhouse");

    let attachments = S3AttachmentStore::new(&config.attachments).await;

    let symbolicator: Option<Arc<dyn Symbolicate>> = if config.symbolication_enabled() {
        let client = HttpSymbolicator::new(
            &config.symbolicator_origin,
            Duration::from_secs(config.symbolicator_timeout_secs),
        )
        .expect("failed to create symbolicator client");
        Some(Arc::new(client))
    } else {
        tracing::warn!("SYMBOLICATOR_ORIGIN not set, symbolication disabled");
        None
    };

    let pipeline = Pipeline {
        ledger: Ledger::new(postgres_pool.clone()),
        writer: Arc::new(writer),
        attachments: Arc::new(attachments),
        symbolicator,
        inet: Arc::new(geoip),
        settings: IngestSettings {
            max_batch_size_bytes: config.max_batch_size_bytes,
            retry_after_secs: config.retry_after_secs,
            symbolicator_batch_size: config.symbolicator_batch_size,
            bucket: BucketOptions {
                stop_after_first_new_group: config.bucket_stop_after_first_new_group,
            },
        },
    };

    let state = AppState {
        pg_pool: postgres_pool,
        pipeline,
    };

    let app = create_router(state);
    let app = setup_metrics_routes(app).expect("failed to install metrics recorder");

    if let Err(e) = listen(app, config.bind()).await {
        tracing::error!("Server error: {}", e);
    }
}
