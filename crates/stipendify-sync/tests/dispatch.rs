use async_trait::async_trait;
use chrono::{Duration, Utc};
use stipendify_core::{EmailReminder, NewScholarship, OrganisationCandidate, ScholarshipCandidate, User};
use stipendify_storage::{MemoryStore, Store};
use stipendify_sync::{dispatch_due, Delivery, DispatchSummary, MailError, Mailer, MailjetMailer};
use tokio::sync::Mutex;
use uuid::Uuid;

const PUBLIC_URL: &str = "https://stipendify.tk0.eu";

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
    reject: Option<String>,
}

impl RecordingMailer {
    fn rejecting(recipient: &str) -> Self {
        Self {
            sent: Mutex::default(),
            reject: Some(recipient.to_string()),
        }
    }

    async fn subjects(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _text: &str) -> Result<Delivery, MailError> {
        if self.reject.as_deref() == Some(to) {
            return Err(MailError::Rejected {
                status: 400,
                body: "invalid recipient".into(),
            });
        }
        self.sent.lock().await.push((to.to_string(), subject.to_string()));
        Ok(Delivery::Sent)
    }
}

async fn user(store: &MemoryStore, email: &str) -> User {
    store
        .insert_user(User {
            id: Uuid::new_v4(),
            email: email.into(),
            first_name: None,
            last_name: None,
            organisation_id: None,
            is_superuser: false,
        })
        .await
        .unwrap()
}

async fn scholarship(store: &MemoryStore, name: &str) -> Uuid {
    let org = store
        .insert_organisation(&OrganisationCandidate::unregistered(format!("Org {name}"), "Trg 1"))
        .await
        .unwrap();
    let candidate = ScholarshipCandidate::new(name, format!("https://example.hr/{name}"));
    store
        .create_scholarship(NewScholarship::from_candidate(&candidate, org.id))
        .await
        .unwrap()
        .id
}

async fn reminder(store: &MemoryStore, email: &str, name: &str, offset: Duration) -> EmailReminder {
    let user = user(store, email).await;
    let scholarship_id = scholarship(store, name).await;
    store
        .create_reminder(user.id, scholarship_id, Utc::now() + offset)
        .await
        .unwrap()
}

#[tokio::test]
async fn due_reminder_is_sent_exactly_once() {
    let store = MemoryStore::new();
    reminder(&store, "ana@example.com", "zagreb", Duration::hours(-1)).await;
    let mailer = RecordingMailer::default();

    let first = dispatch_due(&store, &mailer, PUBLIC_URL, Utc::now()).await.unwrap();
    assert_eq!(
        first,
        DispatchSummary {
            due: 1,
            sent: 1,
            skipped: 0,
            failed: 0
        }
    );
    assert_eq!(mailer.subjects().await, vec!["[Stipendify] Reminder: zagreb"]);
    assert!(store.reminders().await[0].is_sent);

    let second = dispatch_due(&store, &mailer, PUBLIC_URL, Utc::now()).await.unwrap();
    assert_eq!(second, DispatchSummary::default());
    assert_eq!(mailer.subjects().await.len(), 1);
}

#[tokio::test]
async fn reminder_in_the_future_waits() {
    let store = MemoryStore::new();
    reminder(&store, "ana@example.com", "split", Duration::hours(2)).await;
    let mailer = RecordingMailer::default();

    let summary = dispatch_due(&store, &mailer, PUBLIC_URL, Utc::now()).await.unwrap();
    assert_eq!(summary.due, 0);
    assert!(!store.reminders().await[0].is_sent);
}

#[tokio::test]
async fn one_rejected_delivery_does_not_block_the_rest() {
    let store = MemoryStore::new();
    let bad = reminder(&store, "bad@example.com", "rijeka", Duration::hours(-2)).await;
    let good = reminder(&store, "ana@example.com", "sibenik", Duration::hours(-1)).await;
    let mailer = RecordingMailer::rejecting("bad@example.com");

    let summary = dispatch_due(&store, &mailer, PUBLIC_URL, Utc::now()).await.unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);

    let rows = store.reminders().await;
    let state = |id: Uuid| rows.iter().find(|r| r.id == id).unwrap().is_sent;
    assert!(!state(bad.id));
    assert!(state(good.id));

    let retry = dispatch_due(&store, &RecordingMailer::default(), PUBLIC_URL, Utc::now())
        .await
        .unwrap();
    assert_eq!(retry.due, 1);
    assert_eq!(retry.sent, 1);
}

#[tokio::test]
async fn disabled_transport_marks_reminders_handled() {
    let store = MemoryStore::new();
    reminder(&store, "ana@example.com", "zagreb", Duration::minutes(-5)).await;
    let mailer = MailjetMailer::disabled(reqwest::Client::new());

    let summary = dispatch_due(&store, &mailer, PUBLIC_URL, Utc::now()).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert!(store.reminders().await[0].is_sent);
}

#[tokio::test]
async fn failed_commit_leaves_reminders_unsent() {
    let store = MemoryStore::new();
    reminder(&store, "ana@example.com", "zagreb", Duration::minutes(-5)).await;
    store.fail_mark_sent(true);

    let result = dispatch_due(&store, &RecordingMailer::default(), PUBLIC_URL, Utc::now()).await;
    assert!(result.is_err());
    assert!(!store.reminders().await[0].is_sent);
}
