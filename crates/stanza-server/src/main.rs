//! Stanza server binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: in-memory backends, verbose logging
//! stanza-server --bind 127.0.0.1:8080 --log-level debug
//!
//! # Production: shared redis step log and postgres repository
//! stanza-server --bind 0.0.0.0:8080 \
//!     --redis-url redis://redis:6379 \
//!     --database-url postgres://stanza@db/stanza \
//!     --image-service-url http://image-service
//! ```

use std::sync::Arc;

use clap::Parser;
use stanza_server::image::{HttpImageService, ImageService, MemoryImageService};
use stanza_server::repository::{MemoryRepository, PostgresRepository, Repository};
use stanza_server::step_log::{MemoryStepLog, RedisStepLog, STEP_LOG_TTL, StepLog};
use stanza_server::{Hub, Services, transport};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, fmt};

/// Stanza collaboration server
#[derive(Parser, Debug)]
#[command(name = "stanza-server")]
#[command(about = "Coordination server for collaborative document editing")]
#[command(version)]
struct Args {
    /// Address to bind the websocket endpoint to
    #[arg(short, long, env = "STANZA_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Redis instance for the step log (in-memory fallback when absent)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Postgres instance for permissions and projections
    /// (in-memory fallback when absent; every permission then resolves to none)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Image service endpoint for picture duplication
    #[arg(long, env = "IMAGE_SERVICE_URL")]
    image_service_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("stanza server starting");

    let step_log: Arc<dyn StepLog> = match &args.redis_url {
        Some(url) => Arc::new(RedisStepLog::connect(url, STEP_LOG_TTL).await?),
        None => {
            tracing::warn!("no redis url configured - step log is process-local");
            tracing::warn!("catch-up will not survive a restart; not suitable for production");
            Arc::new(MemoryStepLog::new(STEP_LOG_TTL))
        },
    };

    let repository: Arc<dyn Repository> = match &args.database_url {
        Some(url) => Arc::new(PostgresRepository::connect(url).await?),
        None => {
            tracing::warn!("no database url configured - using an empty in-memory repository");
            tracing::warn!("every permission lookup will resolve to none");
            Arc::new(MemoryRepository::new())
        },
    };

    let images: Arc<dyn ImageService> = match &args.image_service_url {
        Some(url) => Arc::new(HttpImageService::new(url.clone())),
        None => {
            tracing::warn!("no image service url configured - picture copies are recorded only");
            Arc::new(MemoryImageService::new())
        },
    };

    let services = Services::new(step_log, repository, images);
    let hub = Hub::spawn(services.clone());

    let listener = TcpListener::bind(&args.bind).await?;

    transport::serve(listener, hub, services).await?;

    Ok(())
}
