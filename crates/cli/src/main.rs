//! `flowchain` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — run the queue workers and the HTTP API.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a task-graph JSON file and print its execution order.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::AppState;
use db::{MemoryWorkflowStore, PgWorkflowStore, PoolSettings, WorkflowStore};
use engine::{AncestorPropagator, TaskDefinition, WorkflowOrchestrator};
use nodes::builtin::PassthroughHandler;
use nodes::HandlerRegistry;
use queue::InMemoryQueue;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "flowchain",
    about = "Workflow compilation and ancestor-propagation engine",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "FLOWCHAIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the queue workers and the REST API server.
    Serve {
        /// Overrides `bind` from the config file.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `database.url`; without any URL records are kept in memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a task-graph JSON file.
    Validate {
        /// Path to a JSON array of task definitions.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind, database_url } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if database_url.is_some() {
                config.database.url = database_url;
            }
            serve(config).await
        }
        Command::Migrate { database_url } => {
            info!("running migrations");
            let pool = db::pool::create_pool(&database_url, &PoolSettings::default())
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("migrations applied successfully");
            Ok(())
        }
        Command::Validate { path } => validate(&path),
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let store: Arc<dyn WorkflowStore> = match &config.database.url {
        Some(url) => {
            let pool = db::pool::create_pool(url, &config.database)
                .await
                .context("failed to connect to database")?;
            Arc::new(PgWorkflowStore::new(pool))
        }
        None => {
            warn!("no database configured, workflow records are kept in memory");
            Arc::new(MemoryWorkflowStore::new())
        }
    };

    let mut registry = HandlerRegistry::new();
    for key in &config.handlers {
        registry.register(Arc::new(PassthroughHandler::new(key.as_str())));
    }
    info!("registered handlers: {:?}", registry.keys());
    let propagator = Arc::new(AncestorPropagator::new(Arc::new(registry)));

    let queue = Arc::new(InMemoryQueue::new(config.queues.clone()));
    for queue_name in config.routing.queue_names() {
        queue.run_worker(&queue_name, propagator.clone())?;
    }
    let retention = Duration::from_secs(config.retention_secs);
    queue.spawn_reaper(
        retention.clamp(Duration::from_secs(1), Duration::from_secs(60)),
        retention,
    );

    let orchestrator = WorkflowOrchestrator::new(queue, store, config.routing.clone());
    orchestrator.ensure_listeners();

    api::serve(&config.bind, AppState::new(Arc::new(orchestrator)))
        .await
        .with_context(|| format!("api server on {} failed", config.bind))
}

fn validate(path: &std::path::Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let tasks: Vec<TaskDefinition> = serde_json::from_str(&content).context("invalid JSON")?;

    if let Err(e) = engine::validate_graph(&tasks) {
        eprintln!("❌ Validation failed: {e}");
        std::process::exit(1);
    }
    let order: Vec<&str> = engine::topological_sort(&tasks)?
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    println!("✅ Workflow is valid. Execution order: {order:?}");
    Ok(())
}
