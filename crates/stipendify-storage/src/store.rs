use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stipendify_core::{
    DueReminder, EmailReminder, NewScholarship, Organisation, OrganisationCandidate, Scholarship,
    Statistics, User,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} with {field} {value:?} already exists")]
    Conflict {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{entity} references missing {target} {id}")]
    ForeignKey {
        entity: &'static str,
        target: &'static str,
        id: Uuid,
    },
    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
    #[error("injected failure: {0}")]
    Injected(&'static str),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Unit of work used by the reconciler. Dropping a transaction without
/// calling [`StoreTx::commit`] discards everything written through it.
#[async_trait]
pub trait StoreTx: Send {
    /// Subset of `urls` that already has a scholarship row.
    async fn existing_scholarship_urls(&mut self, urls: &[String]) -> StoreResult<HashSet<String>>;

    /// Ids of the organisations whose identifier is in `identifiers`, keyed by identifier.
    async fn existing_organisation_ids(
        &mut self,
        identifiers: &[String],
    ) -> StoreResult<HashMap<String, Uuid>>;

    async fn insert_organisations(
        &mut self,
        organisations: &[OrganisationCandidate],
    ) -> StoreResult<Vec<Organisation>>;

    async fn insert_scholarships(&mut self, scholarships: &[NewScholarship]) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Unsent reminders with `remind_at <= now`, oldest first.
    async fn due_reminders(&self, now: DateTime<Utc>) -> StoreResult<Vec<DueReminder>>;

    /// Flags every id as sent in one atomic step.
    async fn mark_reminders_sent(&self, ids: &[Uuid]) -> StoreResult<u64>;

    async fn create_reminder(
        &self,
        user_id: Uuid,
        scholarship_id: Uuid,
        remind_at: DateTime<Utc>,
    ) -> StoreResult<EmailReminder>;

    async fn list_reminders(&self, user_id: Uuid) -> StoreResult<Vec<EmailReminder>>;

    async fn delete_reminder(&self, user_id: Uuid, reminder_id: Uuid) -> StoreResult<()>;

    /// `None` lists every row; `Some(flag)` filters on `is_allowed`.
    async fn list_scholarships(&self, is_allowed: Option<bool>) -> StoreResult<Vec<Scholarship>>;

    async fn organisation_scholarships(&self, organisation_id: Uuid)
        -> StoreResult<Vec<Scholarship>>;

    async fn get_scholarship(&self, id: Uuid) -> StoreResult<Scholarship>;

    async fn create_scholarship(&self, scholarship: NewScholarship) -> StoreResult<Scholarship>;

    async fn update_scholarship(&self, scholarship: &Scholarship) -> StoreResult<Scholarship>;

    async fn delete_scholarship(&self, id: Uuid) -> StoreResult<()>;

    async fn get_user(&self, id: Uuid) -> StoreResult<User>;

    async fn get_organisation(&self, id: Uuid) -> StoreResult<Organisation>;

    async fn statistics(&self) -> StoreResult<Statistics>;
}
