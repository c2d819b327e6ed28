use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stipendify_storage::PgStore;
use stipendify_sync::{BackgroundTasks, SyncConfig, TaskContext};
use stipendify_web::AppState;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "stipendify")]
#[command(about = "Stipendify scholarship aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// HTTP API plus the scrape and reminder loops.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// One scrape-and-reconcile pass.
    Scrape,
    /// One reminder dispatch pass.
    Remind,
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stipendify=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(port).await?,
        Commands::Scrape => {
            let summary = stipendify_sync::run_scrape_once_from_env().await?;
            println!(
                "scrape complete: sources={} failed={} candidates={} new_organisations={} new_scholarships={} skipped={}",
                summary.sources,
                summary.failed_sources,
                summary.candidates,
                summary.reconcile.new_organisations,
                summary.reconcile.new_scholarships,
                summary.reconcile.skipped
            );
        }
        Commands::Remind => {
            let summary = stipendify_sync::run_reminders_once_from_env().await?;
            println!(
                "reminders complete: due={} sent={} skipped={} failed={}",
                summary.due, summary.sent, summary.skipped, summary.failed
            );
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn serve(port: Option<u16>) -> Result<()> {
    let config = SyncConfig::from_env();
    let port = port.unwrap_or_else(stipendify_web::port_from_env);
    let ctx = Arc::new(TaskContext::connect(config).await?);

    let token = CancellationToken::new();
    let tasks = BackgroundTasks::spawn(ctx.clone(), token.child_token());
    let state = AppState::new(ctx.store.clone(), ctx.config.public_url.clone());

    let shutdown = token.clone();
    let result = stipendify_web::serve(state, port, async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("ctrl-c received, shutting down"),
            _ = shutdown.cancelled() => {}
        }
    })
    .await;

    token.cancel();
    tasks.shutdown().await;
    result
}
