//! Thin JSON surface over the store: public listings, organisation and admin
//! CRUD, email reminders and the calendar redirect.

pub mod calendar;
pub mod error;
pub mod identity;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use stipendify_core::{
    initial_visibility, Category, EmailReminder, ImportantDates, NewScholarship, Organisation,
    Origin, Scholarship, ScholarshipPatch, Statistics, UserRole,
};
use stipendify_storage::Store;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub use error::ApiError;
pub use identity::{CurrentUser, HeaderIdentity, IdentityProvider, USER_HEADER};

pub const CRATE_NAME: &str = "stipendify-web";
pub const DEFAULT_PORT: u16 = 8000;

type ApiResult<T> = Result<T, ApiError>;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub public_url: String,
}

impl AppState {
    /// State with the header-based identity provider backed by `store`.
    pub fn new(store: Arc<dyn Store>, public_url: impl Into<String>) -> Self {
        Self {
            identity: Arc::new(HeaderIdentity::new(store.clone())),
            store,
            public_url: public_url.into(),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route(
            "/scholarships",
            get(list_scholarships_handler).post(create_scholarship_handler),
        )
        .route(
            "/scholarships/{id}",
            get(get_scholarship_handler)
                .put(update_scholarship_handler)
                .delete(delete_scholarship_handler),
        )
        .route("/scholarships/{id}/calendar", get(calendar_handler))
        .route("/org/scholarships", get(org_scholarships_handler))
        .route("/org/me", get(org_me_handler))
        .route("/org/{id}", get(organisation_handler))
        .route("/admin/scholarships", get(admin_scholarships_handler))
        .route("/admin/stats", get(admin_stats_handler))
        .route(
            "/email-reminders",
            get(list_reminders_handler)
                .post(create_reminder_handler)
                .delete(delete_reminder_handler),
        )
        .with_state(Arc::new(state))
}

pub fn port_from_env() -> u16 {
    std::env::var("STIPENDIFY_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Binds `0.0.0.0:port` and serves until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "http server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;
    info!("http server stopped");
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn list_scholarships_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Scholarship>>> {
    Ok(Json(state.store.list_scholarships(Some(true)).await?))
}

/// Hidden rows are reported as missing to the public.
async fn visible_scholarship(state: &AppState, id: Uuid) -> ApiResult<Scholarship> {
    let scholarship = state.store.get_scholarship(id).await?;
    if !scholarship.is_allowed {
        return Err(ApiError::NotFound(format!("scholarship {id} not found")));
    }
    Ok(scholarship)
}

async fn get_scholarship_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Scholarship>> {
    Ok(Json(visible_scholarship(&state, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateScholarship {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub url: String,
    /// Only read for administrators; organisation accounts publish under
    /// their own organisation.
    pub organisation_id: Option<Uuid>,
    #[serde(default)]
    pub is_allowed: bool,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub duration_months: Option<i32>,
    #[serde(default)]
    pub important_dates: ImportantDates,
    pub min_grade_average: Option<f64>,
    pub field_of_study: Option<String>,
    pub type_of_study: Option<String>,
    pub min_year_of_study: Option<i32>,
}

async fn create_scholarship_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(body): Json<CreateScholarship>,
) -> ApiResult<(StatusCode, Json<Scholarship>)> {
    user.require_publisher()?;
    let role = user.role();
    let organisation_id = match role {
        UserRole::Admin => body.organisation_id.or(user.0.organisation_id),
        _ => user.0.organisation_id,
    }
    .ok_or_else(|| ApiError::BadRequest("organisation_id is required".into()))?;

    let new = NewScholarship {
        name: body.name,
        description: body.description,
        value: body.value,
        currency: body.currency,
        url: body.url,
        organisation_id,
        is_allowed: initial_visibility(Origin::Human(role), body.is_allowed),
        categories: body.categories,
        requirements: body.requirements,
        duration_months: body.duration_months,
        important_dates: body.important_dates,
        min_grade_average: body.min_grade_average,
        field_of_study: body.field_of_study,
        type_of_study: body.type_of_study,
        min_year_of_study: body.min_year_of_study,
    };
    let created = state.store.create_scholarship(new).await?;
    info!(scholarship_id = %created.id, user_id = %user.0.id, "scholarship created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_scholarship_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    user: CurrentUser,
    Json(patch): Json<ScholarshipPatch>,
) -> ApiResult<Json<Scholarship>> {
    let mut scholarship = state.store.get_scholarship(id).await?;
    user.require_owner(scholarship.organisation_id)?;
    scholarship.apply_patch(patch, user.role());
    Ok(Json(state.store.update_scholarship(&scholarship).await?))
}

async fn delete_scholarship_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    user: CurrentUser,
) -> ApiResult<StatusCode> {
    let scholarship = state.store.get_scholarship(id).await?;
    user.require_owner(scholarship.organisation_id)?;
    state.store.delete_scholarship(id).await?;
    info!(scholarship_id = %id, user_id = %user.0.id, "scholarship deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn calendar_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let scholarship = visible_scholarship(&state, id).await?;
    let date = scholarship
        .important_dates
        .deadline()
        .and_then(calendar::parse_page_date)
        .unwrap_or_else(|| Utc::now().date_naive());
    let url = calendar::calendar_url(
        &calendar::event_name(&scholarship.name),
        &calendar::event_description(&scholarship.description, &state.public_url),
        date,
    );
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

async fn org_scholarships_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Scholarship>>> {
    user.require_publisher()?;
    match user.0.organisation_id {
        Some(org) => Ok(Json(state.store.organisation_scholarships(org).await?)),
        None => Ok(Json(Vec::new())),
    }
}

async fn org_me_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<Organisation>> {
    let org = user
        .0
        .organisation_id
        .ok_or_else(|| ApiError::NotFound("user has no organisation".into()))?;
    Ok(Json(state.store.get_organisation(org).await?))
}

async fn organisation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Organisation>> {
    Ok(Json(state.store.get_organisation(id).await?))
}

async fn admin_scholarships_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Scholarship>>> {
    user.require_admin()?;
    Ok(Json(state.store.list_scholarships(Some(false)).await?))
}

async fn admin_stats_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<Statistics>> {
    user.require_admin()?;
    Ok(Json(state.store.statistics().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateReminder {
    pub scholarship_id: Uuid,
    pub remind_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteReminder {
    pub id: Uuid,
}

async fn create_reminder_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(body): Json<CreateReminder>,
) -> ApiResult<(StatusCode, Json<EmailReminder>)> {
    let reminder = state
        .store
        .create_reminder(user.0.id, body.scholarship_id, body.remind_at)
        .await?;
    info!(reminder_id = %reminder.id, user_id = %user.0.id, "reminder scheduled");
    Ok((StatusCode::CREATED, Json(reminder)))
}

async fn list_reminders_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<EmailReminder>>> {
    Ok(Json(state.store.list_reminders(user.0.id).await?))
}

async fn delete_reminder_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(body): Json<DeleteReminder>,
) -> ApiResult<StatusCode> {
    state.store.delete_reminder(user.0.id, body.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
