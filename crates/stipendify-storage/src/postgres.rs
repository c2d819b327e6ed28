//! PostgreSQL implementation of [`Store`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use stipendify_core::{
    Category, DueReminder, EmailReminder, ImportantDates, NewScholarship, Organisation,
    OrganisationCandidate, Scholarship, Statistics, User,
};
use tracing::debug;
use uuid::Uuid;

use crate::store::{Store, StoreError, StoreResult, StoreTx};

const SCHOLARSHIP_COLUMNS: &str = r#"
    id, name, description, value, currency, url, organisation_id, is_allowed,
    categories, requirements, duration_months, important_dates, min_grade_average,
    field_of_study, type_of_study, min_year_of_study, created_at
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps unique and foreign-key violations onto the typed variants.
fn classify(err: sqlx::Error, entity: &'static str, field: &'static str, value: &str) -> StoreError {
    if let Some(db) = err.as_database_error() {
        match db.code().as_deref() {
            Some("23505") => {
                return StoreError::Conflict {
                    entity,
                    field,
                    value: value.to_string(),
                }
            }
            Some("23503") => {
                return StoreError::ForeignKey {
                    entity,
                    target: "parent",
                    id: Uuid::nil(),
                }
            }
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn categories_to_db(categories: &[Category]) -> Vec<String> {
    categories.iter().map(|c| c.as_str().to_string()).collect()
}

fn scholarship_from_row(row: &PgRow) -> StoreResult<Scholarship> {
    let raw_categories: Vec<String> = row.try_get("categories")?;
    let mut categories = Vec::with_capacity(raw_categories.len());
    for raw in raw_categories {
        let category = Category::parse(&raw).ok_or_else(|| StoreError::Corrupt {
            table: "scholarship",
            detail: format!("unknown category {raw:?}"),
        })?;
        categories.push(category);
    }
    let Json(requirements): Json<Vec<String>> = row.try_get("requirements")?;
    let Json(important_dates): Json<ImportantDates> = row.try_get("important_dates")?;

    Ok(Scholarship {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        value: row.try_get("value")?,
        currency: row.try_get("currency")?,
        url: row.try_get("url")?,
        organisation_id: row.try_get("organisation_id")?,
        is_allowed: row.try_get("is_allowed")?,
        categories,
        requirements,
        duration_months: row.try_get("duration_months")?,
        important_dates,
        min_grade_average: row.try_get("min_grade_average")?,
        field_of_study: row.try_get("field_of_study")?,
        type_of_study: row.try_get("type_of_study")?,
        min_year_of_study: row.try_get("min_year_of_study")?,
        created_at: row.try_get("created_at")?,
    })
}

fn organisation_from_row(row: &PgRow) -> StoreResult<Organisation> {
    Ok(Organisation {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        identifier: row.try_get("identifier")?,
        address: row.try_get("address")?,
    })
}

fn reminder_from_row(row: &PgRow) -> StoreResult<EmailReminder> {
    Ok(EmailReminder {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        scholarship_id: row.try_get("scholarship_id")?,
        remind_at: row.try_get("remind_at")?,
        created_at: row.try_get("created_at")?,
        is_sent: row.try_get("is_sent")?,
    })
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn existing_scholarship_urls(&mut self, urls: &[String]) -> StoreResult<HashSet<String>> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query("SELECT url FROM scholarship WHERE url = ANY($1)")
            .bind(urls)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("url").map_err(StoreError::from))
            .collect()
    }

    async fn existing_organisation_ids(
        &mut self,
        identifiers: &[String],
    ) -> StoreResult<HashMap<String, Uuid>> {
        if identifiers.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query("SELECT id, identifier FROM organisation WHERE identifier = ANY($1)")
            .bind(identifiers)
            .fetch_all(&mut *self.tx)
            .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get("identifier")?, row.try_get("id")?);
        }
        Ok(out)
    }

    async fn insert_organisations(
        &mut self,
        organisations: &[OrganisationCandidate],
    ) -> StoreResult<Vec<Organisation>> {
        let mut inserted = Vec::with_capacity(organisations.len());
        for org in organisations {
            let row = sqlx::query(
                r#"
                INSERT INTO organisation (name, identifier, address)
                VALUES ($1, $2, $3)
                RETURNING id, name, identifier, address
                "#,
            )
            .bind(&org.name)
            .bind(&org.identifier)
            .bind(&org.address)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| classify(e, "organisation", "identifier", &org.identifier))?;
            inserted.push(organisation_from_row(&row)?);
        }
        Ok(inserted)
    }

    async fn insert_scholarships(&mut self, scholarships: &[NewScholarship]) -> StoreResult<u64> {
        let mut count = 0u64;
        for s in scholarships {
            let result = sqlx::query(
                r#"
                INSERT INTO scholarship (
                    name, description, value, currency, url, organisation_id, is_allowed,
                    categories, requirements, duration_months, important_dates,
                    min_grade_average, field_of_study, type_of_study, min_year_of_study
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (url) DO NOTHING
                "#,
            )
            .bind(&s.name)
            .bind(&s.description)
            .bind(s.value)
            .bind(&s.currency)
            .bind(&s.url)
            .bind(s.organisation_id)
            .bind(s.is_allowed)
            .bind(categories_to_db(&s.categories))
            .bind(Json(&s.requirements))
            .bind(s.duration_months)
            .bind(Json(&s.important_dates))
            .bind(s.min_grade_average)
            .bind(&s.field_of_study)
            .bind(&s.type_of_study)
            .bind(s.min_year_of_study)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(e, "scholarship", "url", &s.url))?;
            count += result.rows_affected();
        }
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> StoreResult<Vec<DueReminder>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id AS reminder_id, u.email, s.id AS scholarship_id,
                   s.name AS scholarship_name, s.url AS scholarship_url, r.remind_at
              FROM email_reminder r
              JOIN app_user u ON u.id = r.user_id
              JOIN scholarship s ON s.id = r.scholarship_id
             WHERE NOT r.is_sent
               AND r.remind_at <= $1
             ORDER BY r.remind_at, r.id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DueReminder {
                reminder_id: row.try_get("reminder_id")?,
                recipient: row.try_get("email")?,
                scholarship_id: row.try_get("scholarship_id")?,
                scholarship_name: row.try_get("scholarship_name")?,
                scholarship_url: row.try_get("scholarship_url")?,
                remind_at: row.try_get("remind_at")?,
            });
        }
        Ok(out)
    }

    async fn mark_reminders_sent(&self, ids: &[Uuid]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE email_reminder SET is_sent = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        debug!(rows = result.rows_affected(), "marked reminders sent");
        Ok(result.rows_affected())
    }

    async fn create_reminder(
        &self,
        user_id: Uuid,
        scholarship_id: Uuid,
        remind_at: DateTime<Utc>,
    ) -> StoreResult<EmailReminder> {
        let row = sqlx::query(
            r#"
            INSERT INTO email_reminder (user_id, scholarship_id, remind_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, scholarship_id, remind_at, created_at, is_sent
            "#,
        )
        .bind(user_id)
        .bind(scholarship_id)
        .bind(remind_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match classify(e, "email_reminder", "id", "") {
            StoreError::ForeignKey { entity, .. } => StoreError::ForeignKey {
                entity,
                target: "scholarship",
                id: scholarship_id,
            },
            other => other,
        })?;
        reminder_from_row(&row)
    }

    async fn list_reminders(&self, user_id: Uuid) -> StoreResult<Vec<EmailReminder>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, scholarship_id, remind_at, created_at, is_sent
              FROM email_reminder
             WHERE user_id = $1
             ORDER BY remind_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reminder_from_row).collect()
    }

    async fn delete_reminder(&self, user_id: Uuid, reminder_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM email_reminder WHERE id = $1 AND user_id = $2")
            .bind(reminder_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("email_reminder", reminder_id));
        }
        Ok(())
    }

    async fn list_scholarships(&self, is_allowed: Option<bool>) -> StoreResult<Vec<Scholarship>> {
        let sql = format!(
            "SELECT {SCHOLARSHIP_COLUMNS} FROM scholarship \
             WHERE ($1::BOOLEAN IS NULL OR is_allowed = $1) \
             ORDER BY created_at DESC, name"
        );
        let rows = sqlx::query(&sql)
            .bind(is_allowed)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(scholarship_from_row).collect()
    }

    async fn organisation_scholarships(
        &self,
        organisation_id: Uuid,
    ) -> StoreResult<Vec<Scholarship>> {
        let sql = format!(
            "SELECT {SCHOLARSHIP_COLUMNS} FROM scholarship \
             WHERE organisation_id = $1 ORDER BY created_at DESC, name"
        );
        let rows = sqlx::query(&sql)
            .bind(organisation_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(scholarship_from_row).collect()
    }

    async fn get_scholarship(&self, id: Uuid) -> StoreResult<Scholarship> {
        let sql = format!("SELECT {SCHOLARSHIP_COLUMNS} FROM scholarship WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("scholarship", id))?;
        scholarship_from_row(&row)
    }

    async fn create_scholarship(&self, s: NewScholarship) -> StoreResult<Scholarship> {
        let sql = format!(
            r#"
            INSERT INTO scholarship (
                name, description, value, currency, url, organisation_id, is_allowed,
                categories, requirements, duration_months, important_dates,
                min_grade_average, field_of_study, type_of_study, min_year_of_study
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {SCHOLARSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&s.name)
            .bind(&s.description)
            .bind(s.value)
            .bind(&s.currency)
            .bind(&s.url)
            .bind(s.organisation_id)
            .bind(s.is_allowed)
            .bind(categories_to_db(&s.categories))
            .bind(Json(&s.requirements))
            .bind(s.duration_months)
            .bind(Json(&s.important_dates))
            .bind(s.min_grade_average)
            .bind(&s.field_of_study)
            .bind(&s.type_of_study)
            .bind(s.min_year_of_study)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match classify(e, "scholarship", "url", &s.url) {
                StoreError::ForeignKey { entity, .. } => StoreError::ForeignKey {
                    entity,
                    target: "organisation",
                    id: s.organisation_id,
                },
                other => other,
            })?;
        scholarship_from_row(&row)
    }

    async fn update_scholarship(&self, s: &Scholarship) -> StoreResult<Scholarship> {
        let sql = format!(
            r#"
            UPDATE scholarship
               SET name = $2, description = $3, value = $4, currency = $5, url = $6,
                   is_allowed = $7, categories = $8, requirements = $9,
                   duration_months = $10, important_dates = $11, min_grade_average = $12,
                   field_of_study = $13, type_of_study = $14, min_year_of_study = $15
             WHERE id = $1
            RETURNING {SCHOLARSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(s.id)
            .bind(&s.name)
            .bind(&s.description)
            .bind(s.value)
            .bind(&s.currency)
            .bind(&s.url)
            .bind(s.is_allowed)
            .bind(categories_to_db(&s.categories))
            .bind(Json(&s.requirements))
            .bind(s.duration_months)
            .bind(Json(&s.important_dates))
            .bind(s.min_grade_average)
            .bind(&s.field_of_study)
            .bind(&s.type_of_study)
            .bind(s.min_year_of_study)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "scholarship", "url", &s.url))?
            .ok_or_else(|| StoreError::not_found("scholarship", s.id))?;
        scholarship_from_row(&row)
    }

    async fn delete_scholarship(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM scholarship WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("scholarship", id));
        }
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query(
            r#"
            SELECT id, email, first_name, last_name, organisation_id, is_superuser
              FROM app_user
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("user", id))?;
        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            organisation_id: row.try_get("organisation_id")?,
            is_superuser: row.try_get("is_superuser")?,
        })
    }

    async fn get_organisation(&self, id: Uuid) -> StoreResult<Organisation> {
        let row = sqlx::query("SELECT id, name, identifier, address FROM organisation WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("organisation", id))?;
        organisation_from_row(&row)
    }

    async fn statistics(&self) -> StoreResult<Statistics> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM app_user) AS users,
                   (SELECT COUNT(*) FROM organisation) AS orgs,
                   (SELECT COUNT(*) FROM scholarship WHERE is_allowed) AS active,
                   (SELECT COUNT(*) FROM scholarship WHERE NOT is_allowed) AS inactive
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(Statistics {
            users: row.try_get("users")?,
            orgs: row.try_get("orgs")?,
            active_scholarships: row.try_get("active")?,
            inactive_scholarships: row.try_get("inactive")?,
        })
    }
}
