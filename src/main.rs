//! tilery - tile pyramid processing workers.
//!
//! This binary wires up the configured backend and runs the selected worker
//! pools until interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilery::{
    config::{Backend, Config, Role},
    create_s3_client,
    queue::{JobQueue, MemoryJobQueue, RedisJobQueue},
    store::{
        BlobStore, DynamoRecordStore, FsBlobStore, MemoryRecordStore, RecordStore, S3BlobStore,
        StorageLayout,
    },
    worker::{BlendWorker, ClipWorker, JobHandler, RetryPolicy, TileWorker, WorkerPool},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Backend: {}", config.backend);
    info!(
        "  Roles: {}",
        config
            .roles
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("  Concurrency per role: {}", config.concurrency);
    info!("  Max delivery attempts: {}", config.max_attempts);
    info!("  Visibility window: {}s", config.visibility_secs);

    let collaborators = match build_collaborators(&config).await {
        Ok(collaborators) => collaborators,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    run_pools(&config, collaborators).await;
    ExitCode::SUCCESS
}

// =============================================================================
// Backend Wiring
// =============================================================================

struct Collaborators {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
}

/// Construct the blob store, record store, and queue for the configured
/// backend. Selected once here; workers only ever see the traits.
async fn build_collaborators(config: &Config) -> Result<Collaborators, String> {
    match config.backend {
        Backend::Local => {
            info!("  Data dir: {}", config.data_dir);
            Ok(Collaborators {
                blobs: Arc::new(FsBlobStore::new(&config.data_dir)),
                records: Arc::new(MemoryRecordStore::new()),
                queue: Arc::new(MemoryJobQueue::new(config.visibility())),
            })
        }
        Backend::Aws => {
            // validate() guarantees these are present.
            let bucket = config.s3_bucket.clone().unwrap_or_default();
            let table = config.dynamo_table.clone().unwrap_or_default();
            let redis_url = config.redis_url.clone().unwrap_or_default();

            info!("  S3 bucket: {}", bucket);
            if let Some(ref endpoint) = config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  DynamoDB table: {}", table);

            let s3_client =
                create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;

            let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(config.s3_region.clone()))
                .load()
                .await;
            let dynamo_client = aws_sdk_dynamodb::Client::new(&sdk_config);

            let queue = RedisJobQueue::connect(&redis_url, config.visibility())
                .await
                .map_err(|e| e.to_string())?;

            Ok(Collaborators {
                blobs: Arc::new(S3BlobStore::new(s3_client, bucket)),
                records: Arc::new(DynamoRecordStore::new(dynamo_client, table)),
                queue: Arc::new(queue),
            })
        }
    }
}

// =============================================================================
// Pool Lifecycle
// =============================================================================

/// Run one worker pool per configured role until ctrl-c.
async fn run_pools(config: &Config, collaborators: Collaborators) {
    let layout = StorageLayout::new(&config.image_root, &config.tile_root);
    let retry = RetryPolicy::new(config.max_attempts);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut pools = JoinSet::new();
    for role in &config.roles {
        let handler: Arc<dyn JobHandler> = match role {
            Role::Tile => Arc::new(TileWorker::new(
                collaborators.blobs.clone(),
                collaborators.records.clone(),
                layout.clone(),
            )),
            Role::Clip => Arc::new(ClipWorker::new(
                collaborators.blobs.clone(),
                collaborators.records.clone(),
                collaborators.queue.clone(),
                layout.clone(),
            )),
            Role::Blend => Arc::new(BlendWorker::new(
                collaborators.blobs.clone(),
                collaborators.records.clone(),
                collaborators.queue.clone(),
                layout.clone(),
            )),
        };

        let pool = WorkerPool::new(
            collaborators.queue.clone(),
            handler,
            config.concurrency,
            retry,
        );
        let rx = shutdown_rx.clone();
        pools.spawn(async move { pool.run(rx).await });
    }

    info!("All worker pools running; press ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down; draining in-flight jobs");
    let _ = shutdown_tx.send(true);
    while pools.join_next().await.is_some() {}
    info!("Shutdown complete");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tilery=debug"
    } else {
        "tilery=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
