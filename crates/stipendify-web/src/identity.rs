//! Identity boundary. Authentication itself happens upstream; handlers only
//! ask "who is calling" through [`CurrentUser`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use stipendify_core::{User, UserRole};
use stipendify_storage::Store;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

pub const USER_HEADER: &str = "x-stipendify-user";

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self, headers: &HeaderMap) -> Result<User, ApiError>;
}

/// Trusts a user id set by the fronting auth proxy in `X-Stipendify-User`.
pub struct HeaderIdentity {
    store: Arc<dyn Store>,
}

impl HeaderIdentity {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn current_user(&self, headers: &HeaderMap) -> Result<User, ApiError> {
        let id = headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(ApiError::Unauthenticated)?;
        match self.store.get_user(id).await {
            Ok(user) => Ok(user),
            Err(err) if err.is_not_found() => Err(ApiError::Unauthenticated),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn role(&self) -> UserRole {
        self.0.role()
    }

    /// Organisation accounts and administrators.
    pub fn require_publisher(&self) -> Result<(), ApiError> {
        match self.role() {
            UserRole::Organisation | UserRole::Admin => Ok(()),
            UserRole::Student => Err(ApiError::Forbidden("organisation account required")),
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.role() {
            UserRole::Admin => Ok(()),
            _ => Err(ApiError::Forbidden("administrator account required")),
        }
    }

    /// Owners may touch their organisation's rows; administrators any row.
    pub fn require_owner(&self, organisation_id: Uuid) -> Result<(), ApiError> {
        self.require_publisher()?;
        if self.role() == UserRole::Admin || self.0.organisation_id == Some(organisation_id) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("scholarship belongs to another organisation"))
        }
    }
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        state.identity.current_user(&parts.headers).await.map(CurrentUser)
    }
}
