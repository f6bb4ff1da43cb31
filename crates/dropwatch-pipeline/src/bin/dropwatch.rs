//! dropwatch: command-line entry point for the extraction pipeline.
//!
//! Processes exported channel messages, backfills missing embeddings,
//! reports related updates and applies database migrations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropwatch_core::{shutdown_channel, AggregationMode, ShutdownTrigger};
use dropwatch_db::{Database, PoolConfig};
use dropwatch_inference::{EmbeddingGenerator, GeminiBackend};
use dropwatch_pipeline::{
    backfill_embeddings, related_updates, BatchRunner, JsonlMessageSource, MessageProcessor,
    MessageSource, PipelineConfig, PipelineContext, RelatedOptions,
};

#[derive(Parser)]
#[command(name = "dropwatch")]
#[command(author, version, about = "Extract project updates from channel messages")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process messages from a JSON-lines file
    Process {
        /// File with one message object per line
        file: PathBuf,

        /// Aggregation mode (whole_message or per_update)
        #[arg(short, long)]
        mode: Option<AggregationMode>,

        /// Keep file order instead of sorting by timestamp
        #[arg(long)]
        in_order: bool,

        /// Call the extractor even for links that already have rows
        #[arg(long)]
        reprocess: bool,

        /// Pause after every message, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Attach embeddings to rows stored without one
    Backfill {
        /// Only rows for this project
        #[arg(short, long)]
        project: Option<String>,

        /// Rows per page
        #[arg(long)]
        batch_size: Option<i64>,
    },

    /// Report groups of related updates
    Related {
        /// Similarity threshold
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Only rows from the last N days (0 checks all rows)
        #[arg(long)]
        lookback_days: Option<i64>,

        /// Print groups as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env()?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to database")?;

    match cli.command {
        Commands::Migrate => {
            db.migrate().await?;
            info!("Migrations applied");
        }
        Commands::Process {
            file,
            mode,
            in_order,
            reprocess,
            delay_ms,
        } => {
            if let Some(mode) = mode {
                config = config.with_mode(mode);
            }
            if reprocess {
                config = config.with_skip_processed(false);
            }
            if let Some(ms) = delay_ms {
                config = config.with_message_delay(Duration::from_millis(ms));
            }
            cmd_process(db, config, file, in_order).await?;
        }
        Commands::Backfill {
            project,
            batch_size,
        } => {
            if let Some(size) = batch_size {
                config.backfill_batch_size = size;
            }
            cmd_backfill(db, config, project.as_deref()).await?;
        }
        Commands::Related {
            threshold,
            lookback_days,
            json,
        } => {
            if let Some(t) = threshold {
                config.related_threshold = t;
            }
            if let Some(days) = lookback_days {
                config.related_lookback_days = (days > 0).then_some(days);
            }
            cmd_related(db, config, json).await?;
        }
    }

    Ok(())
}

async fn cmd_process(
    db: Database,
    config: PipelineConfig,
    file: PathBuf,
    in_order: bool,
) -> anyhow::Result<()> {
    let gemini = Arc::new(GeminiBackend::from_env()?);
    let repo = Arc::new(db.updates.clone());
    let (trigger, signal) = shutdown_channel();

    let ctx = PipelineContext::new(config, gemini.clone(), gemini, repo.clone(), repo, signal)?;
    let runner = BatchRunner::new(MessageProcessor::new(ctx), trigger);

    let source: Box<dyn MessageSource> = if in_order {
        Box::new(JsonlMessageSource::open(&file).await?)
    } else {
        Box::new(JsonlMessageSource::load_historical(&file).await?)
    };

    let handle = runner.start(source);
    stop_on_ctrl_c(handle.shutdown_trigger());

    let summary = handle.wait().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_backfill(
    db: Database,
    config: PipelineConfig,
    project: Option<&str>,
) -> anyhow::Result<()> {
    let gemini = Arc::new(GeminiBackend::from_env()?);
    let embedder = EmbeddingGenerator::new(gemini, config.retry_policy());
    let (trigger, signal) = shutdown_channel();
    stop_on_ctrl_c(Arc::new(trigger));

    let report = backfill_embeddings(
        &db.updates,
        &embedder,
        project,
        config.backfill_batch_size,
        &signal,
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_related(db: Database, config: PipelineConfig, json: bool) -> anyhow::Result<()> {
    let options = RelatedOptions::from(&config);
    let groups = related_updates(&db.updates, &db.updates, options, chrono::Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("No related updates above {:.2}", options.threshold);
        return Ok(());
    }
    for group in &groups {
        println!(
            "{} [{}] {}",
            group.source.project_name.as_deref().unwrap_or("Unknown"),
            group.source.activity_type.as_deref().unwrap_or("Unknown"),
            group.source.source_message_link
        );
        for m in &group.matches {
            println!(
                "  {:.3}  {} [{}] {}",
                m.similarity,
                m.project_name.as_deref().unwrap_or("Unknown"),
                m.activity_type.as_deref().unwrap_or("Unknown"),
                m.source_message_link
            );
        }
    }
    Ok(())
}

/// Trigger graceful shutdown on Ctrl-C.
fn stop_on_ctrl_c(trigger: Arc<ShutdownTrigger>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; stopping after the current step");
            trigger.trigger();
        }
    });
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "dropwatch=info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "dropwatch=info,dropwatch_pipeline=info,dropwatch_inference=info,dropwatch_db=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("dropwatch.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console output goes to stderr; stdout carries command results
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}
