mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crate::config::ServerConfig;
use dagchain_core::{
    ContentClient, DagChainBuilder, FinalizationReconciler, FinalityEvent,
    PendingTransactionLedger, ReconcileOutcome, RetrievalEngine, SlidingWindowIndexer,
    run_supervised,
};
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "dagchain")]
#[command(about = "Content-addressed audit chains with range retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervised sliding-window indexer until interrupted
    Indexer {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Record a committed payload as pending at its tentative height
    Commit {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        height: u64,
        #[arg(long)]
        tx_hash: String,
    },
    /// Apply a finality signal read from a JSON file, then build ready blocks
    Apply {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        /// File holding one finality signal
        event: String,
    },
    /// Fetch a height range and print the blocks as JSON
    Fetch {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
        /// Do not cache the result as a span
        #[arg(long)]
        no_cache: bool,
    },
    /// Print span coverage and required containers for a height range
    Plan {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
    },
}

/// Core components wired from one configuration.
struct Services {
    ledger: PendingTransactionLedger,
    reconciler: FinalizationReconciler,
    engine: RetrievalEngine,
    indexer: SlidingWindowIndexer,
}

impl Services {
    async fn open(path: &str) -> anyhow::Result<Self> {
        tracing::info!("Loading config: {}", path);
        let cfg = ServerConfig::from_file(path).context("failed to load config")?;

        let index = cfg
            .open_index_store()
            .await
            .context("failed to open index store")?;
        let content = ContentClient::new(
            cfg.open_content_store()
                .context("failed to open content store")?,
            cfg.core.content_timeout(),
        );

        let ledger = PendingTransactionLedger::new(index.clone());
        let builder = DagChainBuilder::new(index.clone(), content.clone());
        Ok(Self {
            reconciler: FinalizationReconciler::new(builder, ledger.clone()),
            engine: RetrievalEngine::new(index.clone(), content.clone(), &cfg.core),
            indexer: SlidingWindowIndexer::new(index, content, cfg.core.indexer.clone()),
            ledger,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dagchain_server=info,dagchain_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Indexer { config } => {
            let services = Services::open(&config).await?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let supervisor = tokio::spawn(run_supervised(services.indexer, shutdown_rx));

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested, stopping indexer");
            let _ = shutdown_tx.send(true);

            let restarts = supervisor.await.context("indexer supervisor failed")?;
            tracing::info!("Indexer stopped. restarts={}", restarts);
        }
        Commands::Commit {
            config,
            project,
            height,
            tx_hash,
        } => {
            let services = Services::open(&config).await?;
            let entry = services
                .ledger
                .add_pending(&project, height, &tx_hash)
                .await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Apply { config, event } => {
            let services = Services::open(&config).await?;
            let raw = tokio::fs::read(&event)
                .await
                .with_context(|| format!("failed to read event file {}", event))?;
            let event = FinalityEvent::parse(&raw)?;

            let outcome = services.reconciler.apply(event).await?;
            tracing::info!("Applied finality event. outcome={:?}", outcome);

            let project = match &outcome {
                ReconcileOutcome::Touched { project_id, .. }
                | ReconcileOutcome::AlreadyFinalized { project_id, .. }
                | ReconcileOutcome::Discarded { project_id, .. } => Some(project_id.clone()),
                ReconcileOutcome::NoPendingEntry { .. } | ReconcileOutcome::Ignored => None,
            };

            if let Some(project) = project {
                let report = services.reconciler.finalize_ready(&project).await?;
                let built: Vec<_> = report
                    .built
                    .iter()
                    .map(|created| {
                        serde_json::json!({
                            "height": created.block.height,
                            "cid": created.cid,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "project": project,
                        "built": built,
                        "stopped_at": report.stopped_at,
                    }))?
                );
            }
        }
        Commands::Fetch {
            config,
            project,
            from,
            to,
            no_cache,
        } => {
            let services = Services::open(&config).await?;
            let fetched = if no_cache {
                services.engine.fetch_blocks(from, to, &project).await?
            } else {
                services.engine.retrieve(from, to, &project).await?
            };
            println!("{}", serde_json::to_string_pretty(&fetched)?);
        }
        Commands::Plan {
            config,
            project,
            from,
            to,
        } => {
            let services = Services::open(&config).await?;
            let plan = services.engine.plan(from, to, &project).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}
