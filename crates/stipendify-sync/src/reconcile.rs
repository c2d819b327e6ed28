//! Inserts the net-new organisations and scholarships of a scrape pass.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use stipendify_core::{Candidate, NewScholarship, OrganisationCandidate};
use stipendify_storage::{Store, StoreError, StoreResult, StoreTx};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub new_organisations: usize,
    pub new_scholarships: usize,
    /// Candidates that were already stored or repeated within the batch.
    pub skipped: usize,
}

/// Merges `candidates` into the store in one transaction.
///
/// Membership is checked with two set queries keyed on the natural keys
/// (organisation identifier, scholarship url), so reconciling the same batch
/// twice adds nothing the second time. New organisations are inserted first
/// and their fresh ids are what new scholarships point at. Any failure rolls
/// the whole batch back.
pub async fn reconcile(store: &dyn Store, candidates: &[Candidate]) -> StoreResult<ReconcileSummary> {
    let mut tx = store.begin().await?;
    match apply(tx.as_mut(), candidates).await {
        Ok(summary) => {
            tx.commit().await?;
            info!(
                new_organisations = summary.new_organisations,
                new_scholarships = summary.new_scholarships,
                skipped = summary.skipped,
                "reconciled"
            );
            Ok(summary)
        }
        Err(err) => {
            error!(error = %err, candidates = candidates.len(), "reconcile aborted, rolling back");
            if let Err(rollback) = tx.rollback().await {
                error!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn apply(tx: &mut dyn StoreTx, candidates: &[Candidate]) -> StoreResult<ReconcileSummary> {
    let urls = distinct(candidates.iter().map(|c| c.scholarship.url.as_str()));
    let identifiers = distinct(candidates.iter().map(|c| c.organisation.identifier.as_str()));

    let existing_urls = tx.existing_scholarship_urls(&urls).await?;
    let mut organisation_ids: HashMap<String, Uuid> = tx.existing_organisation_ids(&identifiers).await?;

    let mut queued = HashSet::new();
    let new_organisations: Vec<OrganisationCandidate> = candidates
        .iter()
        .map(|c| &c.organisation)
        .filter(|o| !organisation_ids.contains_key(&o.identifier))
        .filter(|o| queued.insert(o.identifier.clone()))
        .cloned()
        .collect();
    let inserted = tx.insert_organisations(&new_organisations).await?;
    for org in &inserted {
        organisation_ids.insert(org.identifier.clone(), org.id);
    }

    let mut seen_urls = HashSet::new();
    let mut new_scholarships = Vec::new();
    for candidate in candidates {
        let url = &candidate.scholarship.url;
        if existing_urls.contains(url) || !seen_urls.insert(url.clone()) {
            continue;
        }
        let identifier = &candidate.organisation.identifier;
        let organisation_id = *organisation_ids
            .get(identifier)
            .ok_or_else(|| StoreError::not_found("organisation", identifier))?;
        new_scholarships.push(NewScholarship::from_candidate(&candidate.scholarship, organisation_id));
    }
    if !new_scholarships.is_empty() {
        tx.insert_scholarships(&new_scholarships).await?;
    }

    Ok(ReconcileSummary {
        new_organisations: inserted.len(),
        new_scholarships: new_scholarships.len(),
        skipped: candidates.len() - new_scholarships.len(),
    })
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(str::to_string)
        .collect()
}
