//! Core domain model for Stipendify: scraped candidates, persisted rows and the
//! rules every other crate agrees on (placeholder identifiers, visibility).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const CRATE_NAME: &str = "stipendify-core";

/// Width of a Croatian registration code (OIB).
pub const IDENTIFIER_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pupil,
    Student,
    Athlete,
    Minority,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pupil => "pupil",
            Category::Student => "student",
            Category::Athlete => "athlete",
            Category::Minority => "minority",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pupil" => Some(Category::Pupil),
            "student" => Some(Category::Student),
            "athlete" => Some(Category::Athlete),
            "minority" => Some(Category::Minority),
            _ => None,
        }
    }
}

/// Partial application-window metadata. Every key is optional; sources publish
/// whichever subset their markup carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportantDates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applications_open: Option<String>,
}

impl ImportantDates {
    pub fn is_empty(&self) -> bool {
        self.published.is_none()
            && self.expires.is_none()
            && self.apply_from.is_none()
            && self.apply_until.is_none()
            && self.applications_open.is_none()
    }

    /// Best guess at the closing date: explicit range end first, then expiry.
    pub fn deadline(&self) -> Option<&str> {
        self.apply_until.as_deref().or(self.expires.as_deref())
    }
}

/// Scholarship fields as extracted from one detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScholarshipCandidate {
    pub title: String,
    pub url: String,
    pub description: String,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub categories: Vec<Category>,
    pub requirements: Vec<String>,
    pub duration_months: Option<u32>,
    pub important_dates: ImportantDates,
    pub status: Option<String>,
}

impl ScholarshipCandidate {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            description: String::new(),
            value: None,
            currency: None,
            categories: Vec::new(),
            requirements: Vec::new(),
            duration_months: None,
            important_dates: ImportantDates::default(),
            status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganisationCandidate {
    pub name: String,
    pub identifier: String,
    pub address: String,
}

impl OrganisationCandidate {
    pub fn new(
        name: impl Into<String>,
        identifier: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            address: address.into(),
        }
    }

    /// Organisation without a published registration code; its identifier is
    /// derived from the name so repeated scrapes collapse onto one row.
    pub fn unregistered(name: impl Into<String>, address: impl Into<String>) -> Self {
        let name = name.into();
        let identifier = placeholder_identifier(&name);
        Self {
            name,
            identifier,
            address: address.into(),
        }
    }
}

/// One extracted scholarship paired with the organisation that publishes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_id: String,
    pub scholarship: ScholarshipCandidate,
    pub organisation: OrganisationCandidate,
}

/// Deterministic stand-in for a registration code.
///
/// The name is lower-cased and whitespace-collapsed, hashed with SHA-256, and
/// rendered as `S` followed by the first ten hex digits. The result has the
/// width of an OIB but is never all-digit, so it cannot equal a real code.
pub fn placeholder_identifier(name: &str) -> String {
    let normalized = name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("S{}", &digest[..IDENTIFIER_LEN - 1])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: Uuid,
    pub name: String,
    pub identifier: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scholarship {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub url: String,
    pub organisation_id: Uuid,
    pub is_allowed: bool,
    pub categories: Vec<Category>,
    pub requirements: Vec<String>,
    pub duration_months: Option<i32>,
    pub important_dates: ImportantDates,
    pub min_grade_average: Option<f64>,
    pub field_of_study: Option<String>,
    pub type_of_study: Option<String>,
    pub min_year_of_study: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`Scholarship`]; storage assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScholarship {
    pub name: String,
    pub description: String,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub url: String,
    pub organisation_id: Uuid,
    pub is_allowed: bool,
    pub categories: Vec<Category>,
    pub requirements: Vec<String>,
    pub duration_months: Option<i32>,
    pub important_dates: ImportantDates,
    pub min_grade_average: Option<f64>,
    pub field_of_study: Option<String>,
    pub type_of_study: Option<String>,
    pub min_year_of_study: Option<i32>,
}

impl NewScholarship {
    pub fn from_candidate(candidate: &ScholarshipCandidate, organisation_id: Uuid) -> Self {
        Self {
            name: candidate.title.clone(),
            description: candidate.description.clone(),
            value: candidate.value,
            currency: candidate.currency.clone(),
            url: candidate.url.clone(),
            organisation_id,
            is_allowed: initial_visibility(Origin::Scraper, false),
            categories: candidate.categories.clone(),
            requirements: candidate.requirements.clone(),
            duration_months: candidate
                .duration_months
                .and_then(|m| i32::try_from(m).ok()),
            important_dates: candidate.important_dates.clone(),
            min_grade_average: None,
            field_of_study: None,
            type_of_study: None,
            min_year_of_study: None,
        }
    }

    pub fn into_scholarship(self, id: Uuid, created_at: DateTime<Utc>) -> Scholarship {
        Scholarship {
            id,
            name: self.name,
            description: self.description,
            value: self.value,
            currency: self.currency,
            url: self.url,
            organisation_id: self.organisation_id,
            is_allowed: self.is_allowed,
            categories: self.categories,
            requirements: self.requirements,
            duration_months: self.duration_months,
            important_dates: self.important_dates,
            min_grade_average: self.min_grade_average,
            field_of_study: self.field_of_study,
            type_of_study: self.type_of_study,
            min_year_of_study: self.min_year_of_study,
            created_at,
        }
    }
}

/// Partial update submitted by an organisation or an administrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScholarshipPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub url: Option<String>,
    pub is_allowed: Option<bool>,
    pub categories: Option<Vec<Category>>,
    pub requirements: Option<Vec<String>>,
    pub duration_months: Option<i32>,
    pub important_dates: Option<ImportantDates>,
    pub min_grade_average: Option<f64>,
    pub field_of_study: Option<String>,
    pub type_of_study: Option<String>,
    pub min_year_of_study: Option<i32>,
}

impl Scholarship {
    /// Applies `patch` in place. A non-admin can hide a scholarship but never
    /// publish one.
    pub fn apply_patch(&mut self, patch: ScholarshipPatch, role: UserRole) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
        if let Some(v) = patch.value {
            self.value = Some(v);
        }
        if let Some(v) = patch.currency {
            self.currency = Some(v);
        }
        if let Some(v) = patch.url {
            self.url = v;
        }
        if let Some(v) = patch.is_allowed {
            if !v || role == UserRole::Admin {
                self.is_allowed = v;
            }
        }
        if let Some(v) = patch.categories {
            self.categories = v;
        }
        if let Some(v) = patch.requirements {
            self.requirements = v;
        }
        if let Some(v) = patch.duration_months {
            self.duration_months = Some(v);
        }
        if let Some(v) = patch.important_dates {
            self.important_dates = v;
        }
        if let Some(v) = patch.min_grade_average {
            self.min_grade_average = Some(v);
        }
        if let Some(v) = patch.field_of_study {
            self.field_of_study = Some(v);
        }
        if let Some(v) = patch.type_of_study {
            self.type_of_study = Some(v);
        }
        if let Some(v) = patch.min_year_of_study {
            self.min_year_of_study = Some(v);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Organisation,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organisation_id: Option<Uuid>,
    pub is_superuser: bool,
}

impl User {
    pub fn role(&self) -> UserRole {
        if self.is_superuser {
            UserRole::Admin
        } else if self.organisation_id.is_some() {
            UserRole::Organisation
        } else {
            UserRole::Student
        }
    }
}

/// Who is creating a scholarship row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Scraper,
    Human(UserRole),
}

/// `is_allowed` for a freshly created scholarship. Only administrators get to
/// choose; other humans always start hidden and scraped rows start visible.
pub fn initial_visibility(origin: Origin, requested: bool) -> bool {
    match origin {
        Origin::Scraper => true,
        Origin::Human(UserRole::Admin) => requested,
        Origin::Human(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailReminder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub scholarship_id: Uuid,
    pub remind_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_sent: bool,
}

/// A reminder joined with what the dispatcher needs to build the email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueReminder {
    pub reminder_id: Uuid,
    pub recipient: String,
    pub scholarship_id: Uuid,
    pub scholarship_name: String,
    pub scholarship_url: String,
    pub remind_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub users: i64,
    pub orgs: i64,
    pub active_scholarships: i64,
    pub inactive_scholarships: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_identifier_is_stable_and_oib_width() {
        let a = placeholder_identifier("Grad Zagreb");
        let b = placeholder_identifier("Grad Zagreb");
        assert_eq!(a, b);
        assert_eq!(a.len(), IDENTIFIER_LEN);
        assert!(a.starts_with('S'));
        assert!(a[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn placeholder_identifier_ignores_case_and_spacing() {
        assert_eq!(
            placeholder_identifier("Grad   Šibenik"),
            placeholder_identifier(" grad šibenik ")
        );
        assert_ne!(
            placeholder_identifier("Grad Split"),
            placeholder_identifier("Grad Rijeka")
        );
    }

    #[test]
    fn placeholder_identifier_matches_documented_derivation() {
        let mut hasher = Sha256::new();
        hasher.update(b"grad rijeka");
        let expected = format!("S{}", &hex::encode(hasher.finalize())[..10]);
        assert_eq!(placeholder_identifier("Grad Rijeka"), expected);
    }

    #[test]
    fn unregistered_organisations_share_identity_across_runs() {
        let first = OrganisationCandidate::unregistered("Grad Split", "Split");
        let second = OrganisationCandidate::unregistered("Grad Split", "Split");
        assert_eq!(first.identifier, second.identifier);
    }

    #[test]
    fn visibility_defaults_by_origin() {
        assert!(initial_visibility(Origin::Scraper, false));
        assert!(!initial_visibility(Origin::Human(UserRole::Organisation), true));
        assert!(!initial_visibility(Origin::Human(UserRole::Student), true));
        assert!(initial_visibility(Origin::Human(UserRole::Admin), true));
        assert!(!initial_visibility(Origin::Human(UserRole::Admin), false));
    }

    #[test]
    fn organisation_patch_cannot_publish() {
        let mut s = NewScholarship::from_candidate(
            &ScholarshipCandidate::new("Stipendija", "https://example.hr/a"),
            Uuid::new_v4(),
        )
        .into_scholarship(Uuid::new_v4(), Utc::now());
        s.is_allowed = false;

        s.apply_patch(
            ScholarshipPatch {
                is_allowed: Some(true),
                name: Some("Nova".into()),
                ..Default::default()
            },
            UserRole::Organisation,
        );
        assert!(!s.is_allowed);
        assert_eq!(s.name, "Nova");

        s.apply_patch(
            ScholarshipPatch {
                is_allowed: Some(true),
                ..Default::default()
            },
            UserRole::Admin,
        );
        assert!(s.is_allowed);
    }

    #[test]
    fn user_role_follows_flags() {
        let mut user = User {
            id: Uuid::new_v4(),
            email: "a@b.hr".into(),
            first_name: None,
            last_name: None,
            organisation_id: None,
            is_superuser: false,
        };
        assert_eq!(user.role(), UserRole::Student);
        user.organisation_id = Some(Uuid::new_v4());
        assert_eq!(user.role(), UserRole::Organisation);
        user.is_superuser = true;
        assert_eq!(user.role(), UserRole::Admin);
    }

    #[test]
    fn important_dates_deadline_prefers_range_end() {
        let dates = ImportantDates {
            expires: Some("31.10.2026".into()),
            apply_until: Some("15.10.2026".into()),
            ..Default::default()
        };
        assert_eq!(dates.deadline(), Some("15.10.2026"));
        assert!(ImportantDates::default().is_empty());
        let json = serde_json::to_value(ImportantDates::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
