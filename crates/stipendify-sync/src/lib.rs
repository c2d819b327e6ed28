//! Scrape-and-reconcile pipeline, reminder dispatch and the background loops
//! that drive them.

use std::sync::Arc;

use anyhow::{Context, Result};
use stipendify_storage::{HttpFetcher, PgStore};

pub mod aggregator;
pub mod config;
pub mod mail;
pub mod reconcile;
pub mod reminders;
pub mod scheduler;

pub use aggregator::{aggregate, AggregateReport, SourceOutcome};
pub use config::{SourceConfig, SourceRegistry, SyncConfig};
pub use mail::{Delivery, MailError, Mailer, MailjetMailer};
pub use reconcile::{reconcile, ReconcileSummary};
pub use reminders::{dispatch_due, reminder_body, reminder_subject, DispatchSummary};
pub use scheduler::{
    run_reminder_pass, run_scrape_pass, BackgroundTasks, ScrapePassSummary, TaskContext,
};

pub const CRATE_NAME: &str = "stipendify-sync";

impl TaskContext {
    /// Connects to Postgres and wires the HTTP client, mailer and source
    /// registry from `config`.
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        let store = PgStore::connect(&config.database_url)
            .await
            .with_context(|| format!("connecting to {}", config.database_url))?;
        let http = HttpFetcher::new(config.http_client_config())?;
        let mailer = MailjetMailer::from_env(http.client().clone());
        if !mailer.is_enabled() {
            tracing::warn!("MAILJET_API_KEY/MAILJET_SECRET_KEY not set, reminder emails are skipped");
        }
        let sources = SourceRegistry::load(&config.workspace_root)?;
        Ok(Self {
            config,
            store: Arc::new(store),
            mailer: Arc::new(mailer),
            http: Arc::new(http),
            sources,
        })
    }
}

pub async fn run_scrape_once_from_env() -> Result<ScrapePassSummary> {
    let ctx = TaskContext::connect(SyncConfig::from_env()).await?;
    run_scrape_pass(&ctx).await
}

pub async fn run_reminders_once_from_env() -> Result<DispatchSummary> {
    let ctx = TaskContext::connect(SyncConfig::from_env()).await?;
    run_reminder_pass(&ctx).await
}
