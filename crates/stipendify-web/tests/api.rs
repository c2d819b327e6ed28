use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use stipendify_core::{NewScholarship, OrganisationCandidate, ScholarshipCandidate, User};
use stipendify_storage::{MemoryStore, Store};
use stipendify_web::{app, AppState, USER_HEADER};
use tower::ServiceExt;
use uuid::Uuid;

const PUBLIC_URL: &str = "https://stipendify.tk0.eu";

struct Fixture {
    store: MemoryStore,
    org_a: Uuid,
    org_b: Uuid,
    student: User,
    org_user: User,
    admin: User,
}

impl Fixture {
    async fn new() -> Self {
        let store = MemoryStore::new();
        let org_a = store
            .insert_organisation(&OrganisationCandidate::unregistered("Grad Zagreb", "Trg Stjepana Radića 1"))
            .await
            .unwrap()
            .id;
        let org_b = store
            .insert_organisation(&OrganisationCandidate::unregistered("Grad Split", "Obala kneza Branimira 17"))
            .await
            .unwrap()
            .id;
        let student = user(&store, "student@example.com", None, false).await;
        let org_user = user(&store, "ured@zagreb.hr", Some(org_a), false).await;
        let admin = user(&store, "admin@stipendify.tk0.eu", None, true).await;
        Self {
            store,
            org_a,
            org_b,
            student,
            org_user,
            admin,
        }
    }

    fn app(&self) -> Router {
        app(AppState::new(Arc::new(self.store.clone()), PUBLIC_URL))
    }

    async fn scholarship(&self, name: &str, org: Uuid, allowed: bool) -> Uuid {
        let candidate = ScholarshipCandidate::new(name, format!("https://example.hr/{name}"));
        let mut new = NewScholarship::from_candidate(&candidate, org);
        new.is_allowed = allowed;
        self.store.create_scholarship(new).await.unwrap().id
    }
}

async fn user(store: &MemoryStore, email: &str, org: Option<Uuid>, admin: bool) -> User {
    store
        .insert_user(User {
            id: Uuid::new_v4(),
            email: email.into(),
            first_name: None,
            last_name: None,
            organisation_id: org,
            is_superuser: admin,
        })
        .await
        .unwrap()
}

fn request(method: Method, uri: &str, as_user: Option<&User>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(u) = as_user {
        builder = builder.header(USER_HEADER, u.id.to_string());
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_answers_ok() {
    let fx = Fixture::new().await;
    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/healthz", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn public_listing_shows_only_visible_rows() {
    let fx = Fixture::new().await;
    fx.scholarship("vidljiva", fx.org_a, true).await;
    let hidden = fx.scholarship("skrivena", fx.org_a, false).await;

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/scholarships", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let rows = json_body(resp).await;
    let names: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["vidljiva"]);

    let resp = fx
        .app()
        .oneshot(request(Method::GET, &format!("/scholarships/{hidden}"), None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn organisation_create_starts_hidden_and_admin_may_publish() {
    let fx = Fixture::new().await;
    let body = json!({
        "name": "Nova stipendija",
        "url": "https://zagreb.hr/nova",
        "is_allowed": true,
        "categories": ["student"]
    });
    let resp = fx
        .app()
        .oneshot(request(Method::POST, "/scholarships", Some(&fx.org_user), Some(body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = json_body(resp).await;
    assert_eq!(created["is_allowed"], json!(false));
    assert_eq!(created["organisation_id"], json!(fx.org_a));

    let body = json!({
        "name": "Admin stipendija",
        "url": "https://split.hr/admin",
        "organisation_id": fx.org_b,
        "is_allowed": true
    });
    let resp = fx
        .app()
        .oneshot(request(Method::POST, "/scholarships", Some(&fx.admin), Some(body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(json_body(resp).await["is_allowed"], json!(true));
}

#[tokio::test]
async fn students_and_anonymous_callers_cannot_create() {
    let fx = Fixture::new().await;
    let body = json!({ "name": "x", "url": "https://example.hr/x" });
    let resp = fx
        .app()
        .oneshot(request(Method::POST, "/scholarships", Some(&fx.student), Some(body.clone())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = fx
        .app()
        .oneshot(request(Method::POST, "/scholarships", None, Some(body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["detail"], json!("authentication required"));
}

#[tokio::test]
async fn admin_without_organisation_must_name_one() {
    let fx = Fixture::new().await;
    let body = json!({ "name": "x", "url": "https://example.hr/x" });
    let resp = fx
        .app()
        .oneshot(request(Method::POST, "/scholarships", Some(&fx.admin), Some(body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn owner_update_cannot_publish_but_can_hide() {
    let fx = Fixture::new().await;
    let hidden = fx.scholarship("skrivena", fx.org_a, false).await;
    let resp = fx
        .app()
        .oneshot(request(
            Method::PUT,
            &format!("/scholarships/{hidden}"),
            Some(&fx.org_user),
            Some(json!({ "is_allowed": true, "value": 250.0 })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = json_body(resp).await;
    assert_eq!(updated["is_allowed"], json!(false));
    assert_eq!(updated["value"], json!(250.0));

    let visible = fx.scholarship("vidljiva", fx.org_a, true).await;
    let resp = fx
        .app()
        .oneshot(request(
            Method::PUT,
            &format!("/scholarships/{visible}"),
            Some(&fx.org_user),
            Some(json!({ "is_allowed": false })),
        ))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["is_allowed"], json!(false));
}

#[tokio::test]
async fn other_organisations_rows_are_off_limits() {
    let fx = Fixture::new().await;
    let foreign = fx.scholarship("splitska", fx.org_b, true).await;
    let resp = fx
        .app()
        .oneshot(request(
            Method::DELETE,
            &format!("/scholarships/{foreign}"),
            Some(&fx.org_user),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(fx.store.scholarships().await.len(), 1);

    let resp = fx
        .app()
        .oneshot(request(
            Method::DELETE,
            &format!("/scholarships/{foreign}"),
            Some(&fx.admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(fx.store.scholarships().await.is_empty());
}

#[tokio::test]
async fn calendar_redirects_to_the_deadline_day() {
    let fx = Fixture::new().await;
    let mut candidate = ScholarshipCandidate::new("ZG stipendija", "https://zagreb.hr/zg");
    candidate.description = "Stipendija   za studente".into();
    candidate.important_dates.apply_until = Some("31.10.2026.".into());
    let id = fx
        .store
        .create_scholarship(NewScholarship::from_candidate(&candidate, fx.org_a))
        .await
        .unwrap()
        .id;

    let resp = fx
        .app()
        .oneshot(request(Method::GET, &format!("/scholarships/{id}/calendar"), None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://calendar.google.com/calendar/render?action=TEMPLATE"));
    assert!(location.contains("text=%5BStipendify%5D+ZG+stipendija"));
    assert!(location.contains("dates=20261031%2F20261031"));
    assert!(location.contains("Stipendija+za+studente"));
    assert!(location.contains("ctz=Europe%2FZagreb"));
}

#[tokio::test]
async fn organisation_views() {
    let fx = Fixture::new().await;
    fx.scholarship("moja", fx.org_a, false).await;
    fx.scholarship("tuđa", fx.org_b, true).await;

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/org/scholarships", Some(&fx.org_user), None))
        .await
        .unwrap();
    let rows = json_body(resp).await;
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["name"], json!("moja"));

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/org/scholarships", Some(&fx.student), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/org/me", Some(&fx.org_user), None))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["name"], json!("Grad Zagreb"));

    let resp = fx
        .app()
        .oneshot(request(Method::GET, &format!("/org/{}", fx.org_b), None, None))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["name"], json!("Grad Split"));
}

#[tokio::test]
async fn admin_review_queue_and_stats() {
    let fx = Fixture::new().await;
    fx.scholarship("vidljiva", fx.org_a, true).await;
    fx.scholarship("na čekanju", fx.org_b, false).await;

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/admin/scholarships", Some(&fx.org_user), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/admin/scholarships", Some(&fx.admin), None))
        .await
        .unwrap();
    let rows = json_body(resp).await;
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["name"], json!("na čekanju"));

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/admin/stats", Some(&fx.admin), None))
        .await
        .unwrap();
    assert_eq!(
        json_body(resp).await,
        json!({
            "users": 3,
            "orgs": 2,
            "active_scholarships": 1,
            "inactive_scholarships": 1
        })
    );
}

#[tokio::test]
async fn reminders_are_scoped_to_their_owner() {
    let fx = Fixture::new().await;
    let id = fx.scholarship("zagreb", fx.org_a, true).await;

    let resp = fx
        .app()
        .oneshot(request(
            Method::POST,
            "/email-reminders",
            Some(&fx.student),
            Some(json!({ "scholarship_id": id, "remind_at": "2026-10-30T08:00:00Z" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let reminder = json_body(resp).await;
    assert_eq!(reminder["is_sent"], json!(false));
    let reminder_id = reminder["id"].clone();

    let resp = fx
        .app()
        .oneshot(request(Method::GET, "/email-reminders", Some(&fx.org_user), None))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await, json!([]));

    let resp = fx
        .app()
        .oneshot(request(
            Method::DELETE,
            "/email-reminders",
            Some(&fx.org_user),
            Some(json!({ "id": reminder_id })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(fx.store.reminders().await.len(), 1);

    let resp = fx
        .app()
        .oneshot(request(
            Method::DELETE,
            "/email-reminders",
            Some(&fx.student),
            Some(json!({ "id": reminder_id })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(fx.store.reminders().await.is_empty());
}

#[tokio::test]
async fn reminder_for_unknown_scholarship_is_rejected() {
    let fx = Fixture::new().await;
    let resp = fx
        .app()
        .oneshot(request(
            Method::POST,
            "/email-reminders",
            Some(&fx.student),
            Some(json!({ "scholarship_id": Uuid::new_v4(), "remind_at": "2026-10-30T08:00:00Z" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
