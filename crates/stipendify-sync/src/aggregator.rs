//! Runs every source extractor end to end and unions what they yield.

use futures::{
    stream::{self, StreamExt},
    FutureExt,
};
use serde::Serialize;
use stipendify_adapters::{ExtractContext, SourceExtractor};
use stipendify_core::Candidate;
use stipendify_storage::HttpFetcher;
use tracing::{info, warn};

/// What one source contributed to a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub discovered: usize,
    pub extracted: usize,
    pub failed_details: usize,
    /// Set when the listing page could not be processed.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct AggregateReport {
    pub candidates: Vec<Candidate>,
    pub sources: Vec<SourceOutcome>,
}

impl AggregateReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| s.error.is_some())
    }
}

/// Never fails as a whole: a source whose listing cannot be fetched is
/// recorded and contributes nothing, and a failing detail page is skipped.
pub async fn aggregate(
    extractors: &[Box<dyn SourceExtractor>],
    http: &HttpFetcher,
    concurrency: usize,
) -> AggregateReport {
    let ctx = ExtractContext::new();
    let runs: Vec<_> = extractors
        .iter()
        .map(|extractor| run_source(extractor.as_ref(), http, &ctx).boxed())
        .collect();
    let results: Vec<(Vec<Candidate>, SourceOutcome)> = stream::iter(runs)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = AggregateReport::default();
    for (candidates, outcome) in results {
        report.candidates.extend(candidates);
        report.sources.push(outcome);
    }
    report.sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    info!(
        run_id = %ctx.run_id,
        candidates = report.candidates.len(),
        failed_sources = report.failed_sources().count(),
        "aggregation finished"
    );
    report
}

async fn run_source(
    extractor: &dyn SourceExtractor,
    http: &HttpFetcher,
    ctx: &ExtractContext,
) -> (Vec<Candidate>, SourceOutcome) {
    let source_id = extractor.source_id();
    let mut outcome = SourceOutcome {
        source_id: source_id.to_string(),
        discovered: 0,
        extracted: 0,
        failed_details: 0,
        error: None,
    };

    let links = match extractor.discover(http, ctx).await {
        Ok(links) => links,
        Err(err) => {
            warn!(source_id, listing = extractor.listing_url(), error = %err, "source skipped");
            outcome.error = Some(err.to_string());
            return (Vec::new(), outcome);
        }
    };
    outcome.discovered = links.len();

    let organisation = extractor.organisation();
    let mut candidates = Vec::with_capacity(links.len());
    for url in links {
        match extractor.extract(http, ctx, &url).await {
            Ok(mut scholarship) => {
                if scholarship.title.trim().is_empty() {
                    scholarship.title = url.clone();
                }
                candidates.push(Candidate {
                    source_id: source_id.to_string(),
                    scholarship,
                    organisation: organisation.clone(),
                });
            }
            Err(err) => {
                warn!(source_id, %url, error = %err, "detail page skipped");
                outcome.failed_details += 1;
            }
        }
    }
    outcome.extracted = candidates.len();
    (candidates, outcome)
}
