//! In-process [`Store`] backing the reconciler, dispatcher and API tests.
//!
//! A transaction holds the whole state lock plus a snapshot taken at `begin`;
//! dropping it without a commit restores the snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stipendify_core::{
    DueReminder, EmailReminder, NewScholarship, Organisation, OrganisationCandidate, Scholarship,
    Statistics, User,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::store::{Store, StoreError, StoreResult, StoreTx};

#[derive(Debug, Clone, Default)]
struct State {
    organisations: Vec<Organisation>,
    users: Vec<User>,
    scholarships: Vec<Scholarship>,
    reminders: Vec<EmailReminder>,
}

impl State {
    fn insert_organisation(&mut self, candidate: &OrganisationCandidate) -> StoreResult<Organisation> {
        if self
            .organisations
            .iter()
            .any(|o| o.identifier == candidate.identifier)
        {
            return Err(StoreError::Conflict {
                entity: "organisation",
                field: "identifier",
                value: candidate.identifier.clone(),
            });
        }
        let org = Organisation {
            id: Uuid::new_v4(),
            name: candidate.name.clone(),
            identifier: candidate.identifier.clone(),
            address: candidate.address.clone(),
        };
        self.organisations.push(org.clone());
        Ok(org)
    }

    fn check_scholarship(&self, url: &str, organisation_id: Uuid, except: Option<Uuid>) -> StoreResult<()> {
        if self
            .scholarships
            .iter()
            .any(|s| s.url == url && Some(s.id) != except)
        {
            return Err(StoreError::Conflict {
                entity: "scholarship",
                field: "url",
                value: url.to_string(),
            });
        }
        if !self.organisations.iter().any(|o| o.id == organisation_id) {
            return Err(StoreError::ForeignKey {
                entity: "scholarship",
                target: "organisation",
                id: organisation_id,
            });
        }
        Ok(())
    }

    fn insert_scholarship(&mut self, new: NewScholarship) -> StoreResult<Scholarship> {
        self.check_scholarship(&new.url, new.organisation_id, None)?;
        let row = new.into_scholarship(Uuid::new_v4(), Utc::now());
        self.scholarships.push(row.clone());
        Ok(row)
    }
}

#[derive(Debug, Default)]
struct Failures {
    scholarship_inserts: AtomicBool,
    mark_sent: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    failures: Arc<Failures>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent scholarship insert fail until reset.
    pub fn fail_scholarship_inserts(&self, fail: bool) {
        self.failures.scholarship_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mark_sent(&self, fail: bool) {
        self.failures.mark_sent.store(fail, Ordering::SeqCst);
    }

    pub async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict {
                entity: "user",
                field: "email",
                value: user.email,
            });
        }
        state.users.push(user.clone());
        Ok(user)
    }

    pub async fn insert_organisation(
        &self,
        candidate: &OrganisationCandidate,
    ) -> StoreResult<Organisation> {
        self.state.lock().await.insert_organisation(candidate)
    }

    pub async fn organisations(&self) -> Vec<Organisation> {
        self.state.lock().await.organisations.clone()
    }

    pub async fn scholarships(&self) -> Vec<Scholarship> {
        self.state.lock().await.scholarships.clone()
    }

    pub async fn reminders(&self) -> Vec<EmailReminder> {
        self.state.lock().await.reminders.clone()
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    snapshot: Option<State>,
    failures: Arc<Failures>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn existing_scholarship_urls(&mut self, urls: &[String]) -> StoreResult<HashSet<String>> {
        let wanted: HashSet<&String> = urls.iter().collect();
        Ok(self
            .guard
            .scholarships
            .iter()
            .filter(|s| wanted.contains(&s.url))
            .map(|s| s.url.clone())
            .collect())
    }

    async fn existing_organisation_ids(
        &mut self,
        identifiers: &[String],
    ) -> StoreResult<HashMap<String, Uuid>> {
        let wanted: HashSet<&String> = identifiers.iter().collect();
        Ok(self
            .guard
            .organisations
            .iter()
            .filter(|o| wanted.contains(&o.identifier))
            .map(|o| (o.identifier.clone(), o.id))
            .collect())
    }

    async fn insert_organisations(
        &mut self,
        organisations: &[OrganisationCandidate],
    ) -> StoreResult<Vec<Organisation>> {
        organisations
            .iter()
            .map(|candidate| self.guard.insert_organisation(candidate))
            .collect()
    }

    async fn insert_scholarships(&mut self, scholarships: &[NewScholarship]) -> StoreResult<u64> {
        if self.failures.scholarship_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("scholarship insert"));
        }
        for s in scholarships {
            self.guard.insert_scholarship(s.clone())?;
        }
        Ok(scholarships.len() as u64)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(Box::new(MemoryTx {
            guard,
            snapshot,
            failures: self.failures.clone(),
        }))
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> StoreResult<Vec<DueReminder>> {
        let state = self.state.lock().await;
        let mut due = Vec::new();
        for r in state.reminders.iter().filter(|r| !r.is_sent && r.remind_at <= now) {
            let (Some(user), Some(scholarship)) = (
                state.users.iter().find(|u| u.id == r.user_id),
                state.scholarships.iter().find(|s| s.id == r.scholarship_id),
            ) else {
                continue;
            };
            due.push(DueReminder {
                reminder_id: r.id,
                recipient: user.email.clone(),
                scholarship_id: scholarship.id,
                scholarship_name: scholarship.name.clone(),
                scholarship_url: scholarship.url.clone(),
                remind_at: r.remind_at,
            });
        }
        due.sort_by(|a, b| a.remind_at.cmp(&b.remind_at));
        Ok(due)
    }

    async fn mark_reminders_sent(&self, ids: &[Uuid]) -> StoreResult<u64> {
        if self.failures.mark_sent.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("mark reminders sent"));
        }
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let mut state = self.state.lock().await;
        let mut count = 0;
        for r in state.reminders.iter_mut().filter(|r| wanted.contains(&r.id)) {
            r.is_sent = true;
            count += 1;
        }
        Ok(count)
    }

    async fn create_reminder(
        &self,
        user_id: Uuid,
        scholarship_id: Uuid,
        remind_at: DateTime<Utc>,
    ) -> StoreResult<EmailReminder> {
        let mut state = self.state.lock().await;
        if !state.users.iter().any(|u| u.id == user_id) {
            return Err(StoreError::ForeignKey {
                entity: "email_reminder",
                target: "user",
                id: user_id,
            });
        }
        if !state.scholarships.iter().any(|s| s.id == scholarship_id) {
            return Err(StoreError::ForeignKey {
                entity: "email_reminder",
                target: "scholarship",
                id: scholarship_id,
            });
        }
        let reminder = EmailReminder {
            id: Uuid::new_v4(),
            user_id,
            scholarship_id,
            remind_at,
            created_at: Utc::now(),
            is_sent: false,
        };
        state.reminders.push(reminder.clone());
        Ok(reminder)
    }

    async fn list_reminders(&self, user_id: Uuid) -> StoreResult<Vec<EmailReminder>> {
        let state = self.state.lock().await;
        let mut out: Vec<_> = state
            .reminders
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.remind_at.cmp(&b.remind_at));
        Ok(out)
    }

    async fn delete_reminder(&self, user_id: Uuid, reminder_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let before = state.reminders.len();
        state
            .reminders
            .retain(|r| !(r.id == reminder_id && r.user_id == user_id));
        if state.reminders.len() == before {
            return Err(StoreError::not_found("email_reminder", reminder_id));
        }
        Ok(())
    }

    async fn list_scholarships(&self, is_allowed: Option<bool>) -> StoreResult<Vec<Scholarship>> {
        let state = self.state.lock().await;
        Ok(state
            .scholarships
            .iter()
            .filter(|s| is_allowed.map_or(true, |flag| s.is_allowed == flag))
            .cloned()
            .collect())
    }

    async fn organisation_scholarships(
        &self,
        organisation_id: Uuid,
    ) -> StoreResult<Vec<Scholarship>> {
        let state = self.state.lock().await;
        Ok(state
            .scholarships
            .iter()
            .filter(|s| s.organisation_id == organisation_id)
            .cloned()
            .collect())
    }

    async fn get_scholarship(&self, id: Uuid) -> StoreResult<Scholarship> {
        let state = self.state.lock().await;
        state
            .scholarships
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("scholarship", id))
    }

    async fn create_scholarship(&self, scholarship: NewScholarship) -> StoreResult<Scholarship> {
        if self.failures.scholarship_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("scholarship insert"));
        }
        self.state.lock().await.insert_scholarship(scholarship)
    }

    async fn update_scholarship(&self, scholarship: &Scholarship) -> StoreResult<Scholarship> {
        let mut state = self.state.lock().await;
        state.check_scholarship(
            &scholarship.url,
            scholarship.organisation_id,
            Some(scholarship.id),
        )?;
        let row = state
            .scholarships
            .iter_mut()
            .find(|s| s.id == scholarship.id)
            .ok_or_else(|| StoreError::not_found("scholarship", scholarship.id))?;
        let created_at = row.created_at;
        *row = scholarship.clone();
        row.created_at = created_at;
        Ok(row.clone())
    }

    async fn delete_scholarship(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let before = state.scholarships.len();
        state.scholarships.retain(|s| s.id != id);
        if state.scholarships.len() == before {
            return Err(StoreError::not_found("scholarship", id));
        }
        state.reminders.retain(|r| r.scholarship_id != id);
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    async fn get_organisation(&self, id: Uuid) -> StoreResult<Organisation> {
        let state = self.state.lock().await;
        state
            .organisations
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("organisation", id))
    }

    async fn statistics(&self) -> StoreResult<Statistics> {
        let state = self.state.lock().await;
        let active = state.scholarships.iter().filter(|s| s.is_allowed).count() as i64;
        Ok(Statistics {
            users: state.users.len() as i64,
            orgs: state.organisations.len() as i64,
            active_scholarships: active,
            inactive_scholarships: state.scholarships.len() as i64 - active,
        })
    }
}
