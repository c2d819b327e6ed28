use askama::Template;
use chrono::{DateTime, Utc};
use serde::Serialize;
use stipendify_core::DueReminder;
use stipendify_storage::{Store, StoreResult};
use tracing::{info, warn};

use crate::mail::{Delivery, Mailer};

#[derive(Template)]
#[template(path = "reminder.txt")]
struct ReminderEmail<'a> {
    scholarship_name: &'a str,
    scholarship_url: &'a str,
    public_url: &'a str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub due: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn reminder_subject(scholarship_name: &str) -> String {
    format!("[Stipendify] Reminder: {scholarship_name}")
}

pub fn reminder_body(reminder: &DueReminder, public_url: &str) -> Result<String, askama::Error> {
    ReminderEmail {
        scholarship_name: &reminder.scholarship_name,
        scholarship_url: &reminder.scholarship_url,
        public_url,
    }
    .render()
}

/// One dispatch pass over reminders due at `now`.
///
/// A reminder that fails to render or send stays unsent and is retried next
/// pass. Sent and skipped reminders are marked in a single write at the end,
/// and only when there is at least one.
pub async fn dispatch_due(
    store: &dyn Store,
    mailer: &dyn Mailer,
    public_url: &str,
    now: DateTime<Utc>,
) -> StoreResult<DispatchSummary> {
    let due = store.due_reminders(now).await?;
    let mut summary = DispatchSummary {
        due: due.len(),
        ..Default::default()
    };
    let mut handled = Vec::with_capacity(due.len());

    for reminder in &due {
        let body = match reminder_body(reminder, public_url) {
            Ok(body) => body,
            Err(err) => {
                warn!(reminder_id = %reminder.reminder_id, error = %err, "rendering reminder failed");
                summary.failed += 1;
                continue;
            }
        };
        let subject = reminder_subject(&reminder.scholarship_name);
        match mailer.send(&reminder.recipient, &subject, &body).await {
            Ok(Delivery::Sent) => {
                summary.sent += 1;
                handled.push(reminder.reminder_id);
            }
            Ok(Delivery::Skipped) => {
                summary.skipped += 1;
                handled.push(reminder.reminder_id);
            }
            Err(err) => {
                warn!(
                    reminder_id = %reminder.reminder_id,
                    recipient = %reminder.recipient,
                    error = %err,
                    "reminder delivery failed"
                );
                summary.failed += 1;
            }
        }
    }

    if !handled.is_empty() {
        store.mark_reminders_sent(&handled).await?;
    }
    if summary.due > 0 {
        info!(
            due = summary.due,
            sent = summary.sent,
            skipped = summary.skipped,
            failed = summary.failed,
            "reminder pass finished"
        );
    }
    Ok(summary)
}
