//! # pqload
//!
//! Parquet-to-PostgreSQL order loader.
//!
//! ## Modes
//!
//! - **Run**: one invocation for an event file, stdin, or an explicit object
//! - **Serve**: HTTP trigger endpoint with health and metrics
//!
//! Database connection parameters always come from the environment (`HOST`,
//! `PORT`, `rdsuser`, `rdspassword`, `rdsdb`) and are validated before any
//! other I/O.
//!
//! ## Usage
//!
//! ```bash
//! # Process an S3 notification from a file
//! pqload run --event notification.json
//!
//! # Process one object directly
//! pqload run --bucket orders-inbox --key daily/orders.parquet
//!
//! # Replay against a local directory instead of S3
//! pqload --local-root ./buckets run --bucket orders-inbox --key orders.parquet
//!
//! # Run as a service
//! pqload serve --port 8080
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;

use pqload::{
    BulkLoader, ColumnarDecoder, FieldResolution, NotificationBatch, ObjectRef, Pipeline,
    S3Fetcher, ServiceState,
};
use pqload_core::{
    DatabaseConfig, LocalDirFetcher, LogFormat, ObjectFetcher, ScratchStore, init_logging,
};

// ============================================================================
// CLI Arguments
// ============================================================================

/// Parquet-to-PostgreSQL order loader.
#[derive(Debug, Parser)]
#[command(name = "pqload")]
#[command(about = "Loads Parquet order files into PostgreSQL")]
#[command(version)]
struct Args {
    /// Log output format (`json` or `pretty`).
    #[arg(long, env = "PQLOAD_LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    /// Read objects from this directory (bucket = sub-directory) instead of S3.
    #[arg(long, env = "PQLOAD_LOCAL_ROOT", global = true)]
    local_root: Option<PathBuf>,

    /// AWS region override for S3.
    #[arg(long, env = "PQLOAD_AWS_REGION", global = true)]
    region: Option<String>,

    /// Directory for per-invocation scratch space (default: system temp dir).
    #[arg(long, env = "PQLOAD_SCRATCH_DIR", global = true)]
    scratch_dir: Option<PathBuf>,

    /// Column override `FIELD=ADDRESS` (e.g. `quantity=qty`, `email=#3`).
    #[arg(long = "column", value_name = "FIELD=ADDRESS", global = true)]
    columns: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single invocation and print its acknowledgment.
    Run {
        /// Notification JSON file (`-` or omitted reads stdin).
        #[arg(long, conflicts_with_all = ["bucket", "key"])]
        event: Option<PathBuf>,

        /// Bucket of the object to load (skips notification parsing).
        #[arg(long, requires = "key")]
        bucket: Option<String>,

        /// Key of the object to load.
        #[arg(long, requires = "bucket")]
        key: Option<String>,
    },

    /// Run as a service accepting notifications over HTTP.
    Serve {
        /// HTTP port for the trigger, health and metrics endpoints.
        #[arg(long, env = "PQLOAD_SERVE_PORT", default_value = "8080")]
        port: u16,
    },
}

// ============================================================================
// Pipeline Assembly
// ============================================================================

async fn build_pipeline(args: &Args, database: DatabaseConfig) -> Result<Pipeline> {
    let mut resolution = FieldResolution::default();
    for spec in &args.columns {
        resolution
            .apply_override(spec)
            .with_context(|| format!("invalid --column '{spec}'"))?;
    }

    let fetcher: Arc<dyn ObjectFetcher> = match &args.local_root {
        Some(root) => {
            tracing::info!(root = %root.display(), "using local directory fetcher");
            Arc::new(LocalDirFetcher::new(root))
        }
        None => Arc::new(S3Fetcher::from_env(args.region.clone()).await),
    };

    let scratch = args
        .scratch_dir
        .clone()
        .map_or_else(ScratchStore::system, ScratchStore::new);

    tracing::info!(
        database = %database,
        scratch = %scratch.root().display(),
        "pipeline configured"
    );

    Ok(Pipeline::new(
        fetcher,
        ColumnarDecoder::new(resolution),
        BulkLoader::postgres(database),
        scratch,
    ))
}

async fn read_event(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path != Path::new("-") => tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read event file {}", path.display())),
        _ => {
            let mut payload = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut payload)
                .await
                .context("cannot read event from stdin")?;
            Ok(payload)
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);

    let database = DatabaseConfig::from_env().context("database configuration")?;
    let pipeline = build_pipeline(&args, database).await?;

    match args.command {
        Commands::Run { event, bucket, key } => {
            let ack = match (bucket, key) {
                (Some(bucket), Some(key)) => pipeline.process(&ObjectRef::new(bucket, key)).await?,
                _ => {
                    let payload = read_event(event.as_deref()).await?;
                    let batch = NotificationBatch::from_json(&payload)?;
                    pipeline.process_event(&batch).await?
                }
            };
            println!("{}", serde_json::to_string(&ack)?);
        }

        Commands::Serve { port } => {
            pqload::metrics::init_metrics()?;

            let router = pqload::router(Arc::new(ServiceState::new(pipeline)));
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            tracing::info!(address = %addr, "Starting trigger endpoint");

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router).await?;
        }
    }

    Ok(())
}
