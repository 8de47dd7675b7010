use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tabsink_ingest::{HttpConfig, HttpDownloader};
use tabsink_query::QueryFacade;
use tabsink_store::{PgStore, SourceStore};
use tabsink_sync::{apply_seed, build_scheduler, load_seed_file, SyncConfig, SyncEngine};
use tabsink_web::AppState;

#[derive(Debug, Parser)]
#[command(name = "tabsink")]
#[command(about = "Tabular data sink: import CSV/TSV sources, query them by logical names")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API, with the periodic sync tick when enabled.
    Serve,
    /// Sync one source now, by short key or id.
    Sync {
        #[arg(long)]
        source: String,
    },
    /// Run the due-source batch once.
    SyncDue,
    /// Apply database migrations.
    Migrate,
    /// Manage configured sources.
    Sources {
        #[command(subcommand)]
        command: SourcesCommand,
    },
}

#[derive(Debug, Subcommand)]
enum SourcesCommand {
    /// Create or update sources from a YAML seed file.
    Load { file: PathBuf },
    /// List configured sources with their sync state.
    List,
}

fn build_engine(config: &SyncConfig, store: Arc<PgStore>) -> Result<Arc<SyncEngine>> {
    let downloader = HttpDownloader::new(HttpConfig {
        connect_timeout: std::time::Duration::from_secs(config.http_connect_timeout_secs),
        total_timeout: std::time::Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })?;
    Ok(Arc::new(SyncEngine::new(
        store.clone(),
        store,
        Arc::new(downloader),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );

    match cli.command {
        Commands::Serve => {
            let engine = build_engine(&config, store.clone())?;
            let facade = Arc::new(QueryFacade::new(store.clone(), store.clone()));
            if let Some(scheduler) = build_scheduler(engine.clone(), &config).await? {
                scheduler.start().await.context("starting scheduler")?;
            }
            tabsink_web::serve(AppState::new(facade, engine), config.web_port).await?;
        }
        Commands::Sync { source } => {
            let facade = QueryFacade::new(store.clone(), store.clone());
            let resolved = facade
                .resolve_source(&source)
                .await
                .with_context(|| format!("resolving source {source:?}"))?;
            let engine = build_engine(&config, store.clone())?;
            let outcome = engine.sync_source(resolved.id).await?;
            println!(
                "{}: {} ({} rows)",
                if outcome.ok { "ok" } else { "failed" },
                outcome.message,
                outcome.rows
            );
            if !outcome.ok {
                std::process::exit(1);
            }
        }
        Commands::SyncDue => {
            let engine = build_engine(&config, store.clone())?;
            let summary = engine.sync_due_sources().await?;
            println!(
                "batch complete: checked={} synced={} failed={} skipped={}",
                summary.checked, summary.synced, summary.failed, summary.skipped
            );
        }
        Commands::Migrate => {
            store.run_migrations().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Sources { command } => match command {
            SourcesCommand::Load { file } => {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let seed = load_seed_file(&text)?;
                let summary = apply_seed(store.as_ref(), &seed).await?;
                println!(
                    "seed applied: created={} updated={}",
                    summary.created, summary.updated
                );
            }
            SourcesCommand::List => {
                let sources = store.list_sources(None).await?;
                for source in sources {
                    println!(
                        "{}  {}  [{}]  {}  last_run={} ({})",
                        source.id,
                        source.short_key.as_deref().unwrap_or("-"),
                        source.status.as_str(),
                        source.name,
                        source
                            .last_run_at
                            .map(|at| at.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string()),
                        source.last_run_status.as_str()
                    );
                }
            }
        },
    }

    Ok(())
}
