//! The two background loops: scrape-and-reconcile and reminder dispatch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use stipendify_storage::{HttpFetcher, Store};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregator::aggregate;
use crate::config::{SourceRegistry, SyncConfig};
use crate::mail::Mailer;
use crate::reconcile::{reconcile, ReconcileSummary};
use crate::reminders::{dispatch_due, DispatchSummary};

/// Everything a pass needs, shared by both loops and the request path.
pub struct TaskContext {
    pub config: SyncConfig,
    pub store: Arc<dyn Store>,
    pub mailer: Arc<dyn Mailer>,
    pub http: Arc<HttpFetcher>,
    pub sources: SourceRegistry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapePassSummary {
    pub sources: usize,
    pub failed_sources: usize,
    pub candidates: usize,
    pub reconcile: ReconcileSummary,
}

/// Aggregates every enabled source with freshly built extractors, then
/// reconciles the candidates.
pub async fn run_scrape_pass(ctx: &TaskContext) -> Result<ScrapePassSummary> {
    let extractors = ctx.sources.build_extractors()?;
    let report = aggregate(&extractors, &ctx.http, ctx.config.source_concurrency).await;
    let merged = reconcile(ctx.store.as_ref(), &report.candidates)
        .await
        .context("reconciling scraped candidates")?;
    Ok(ScrapePassSummary {
        sources: report.sources.len(),
        failed_sources: report.failed_sources().count(),
        candidates: report.candidates.len(),
        reconcile: merged,
    })
}

pub async fn run_reminder_pass(ctx: &TaskContext) -> Result<DispatchSummary> {
    dispatch_due(
        ctx.store.as_ref(),
        ctx.mailer.as_ref(),
        &ctx.config.public_url,
        Utc::now(),
    )
    .await
    .context("dispatching due reminders")
}

pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn spawn(ctx: Arc<TaskContext>, token: CancellationToken) -> Self {
        let scrape_ctx = ctx.clone();
        let scrape = tokio::spawn(repeat(
            "scrape",
            ctx.config.scrape_interval,
            token.clone(),
            move || {
                let ctx = scrape_ctx.clone();
                async move {
                    match run_scrape_pass(&ctx).await {
                        Ok(summary) => info!(
                            sources = summary.sources,
                            failed_sources = summary.failed_sources,
                            candidates = summary.candidates,
                            new_scholarships = summary.reconcile.new_scholarships,
                            "scrape pass finished"
                        ),
                        Err(err) => error!(error = %format!("{err:#}"), "scrape pass failed"),
                    }
                }
            },
        ));

        let reminder_ctx = ctx.clone();
        let reminders = tokio::spawn(repeat(
            "reminders",
            ctx.config.reminder_interval,
            token.clone(),
            move || {
                let ctx = reminder_ctx.clone();
                async move {
                    if let Err(err) = run_reminder_pass(&ctx).await {
                        error!(error = %format!("{err:#}"), "reminder pass failed");
                    }
                }
            },
        ));

        Self {
            token,
            handles: vec![scrape, reminders],
        }
    }

    /// Cancels both loops and waits until they have stopped.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "background task ended abnormally");
            }
        }
        info!("background tasks stopped");
    }
}

/// Runs `pass` now and then every `interval` until `token` is cancelled. An
/// in-flight pass is dropped on cancellation.
async fn repeat<F, Fut>(name: &'static str, interval: Duration, token: CancellationToken, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!(task = name, interval_secs = interval.as_secs(), "background task started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = pass() => {}
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!(task = name, "background task cancelled");
}
