//! Outbound email. The dispatcher only sees [`Mailer`]; Mailjet is the
//! shipped transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const MAILJET_SEND_URL: &str = "https://api.mailjet.com/v3.1/send";
pub const SENDER_EMAIL: &str = "no-reply@stipendify.tk0.eu";
pub const SENDER_NAME: &str = "Stipendify";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The transport is switched off; nothing left the process.
    Skipped,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str) -> Result<Delivery, MailError>;
}

#[derive(Debug, Clone)]
struct Credentials {
    api_key: String,
    secret_key: String,
}

#[derive(Debug, Clone)]
pub struct MailjetMailer {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<Credentials>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendRequest<'a> {
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Message<'a> {
    from: Address<'a>,
    to: [Address<'a>; 1],
    subject: &'a str,
    text_part: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendResponse {
    #[serde(default)]
    messages: Vec<MessageStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageStatus {
    status: String,
}

fn request_body<'a>(to: &'a str, subject: &'a str, text: &'a str) -> SendRequest<'a> {
    SendRequest {
        messages: [Message {
            from: Address {
                email: SENDER_EMAIL,
                name: Some(SENDER_NAME),
            },
            to: [Address { email: to, name: None }],
            subject,
            text_part: text,
        }],
    }
}

impl MailjetMailer {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: MAILJET_SEND_URL.to_string(),
            credentials: Some(Credentials {
                api_key: api_key.into(),
                secret_key: secret_key.into(),
            }),
        }
    }

    pub fn disabled(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: MAILJET_SEND_URL.to_string(),
            credentials: None,
        }
    }

    /// Enabled only when both `MAILJET_API_KEY` and `MAILJET_SECRET_KEY` are set.
    pub fn from_env(client: reqwest::Client) -> Self {
        Self::from_keys(
            client,
            std::env::var("MAILJET_API_KEY").ok(),
            std::env::var("MAILJET_SECRET_KEY").ok(),
        )
    }

    fn from_keys(client: reqwest::Client, api_key: Option<String>, secret_key: Option<String>) -> Self {
        match (api_key, secret_key) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Self::new(client, key, secret)
            }
            _ => Self::disabled(client),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }
}

#[async_trait]
impl Mailer for MailjetMailer {
    async fn send(&self, to: &str, subject: &str, text: &str) -> Result<Delivery, MailError> {
        let Some(credentials) = &self.credentials else {
            debug!(to, subject, "mail disabled, skipping");
            return Ok(Delivery::Skipped);
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&credentials.api_key, Some(&credentials.secret_key))
            .json(&request_body(to, subject, text))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendResponse = serde_json::from_str(&body).unwrap_or(SendResponse {
            messages: Vec::new(),
        });
        if parsed.messages.iter().any(|m| m.status != "success") {
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Delivery::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_matches_mailjet_v31_shape() {
        let value = serde_json::to_value(request_body("ana@example.com", "Hi", "Body")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "Messages": [{
                    "From": {"Email": SENDER_EMAIL, "Name": SENDER_NAME},
                    "To": [{"Email": "ana@example.com"}],
                    "Subject": "Hi",
                    "TextPart": "Body"
                }]
            })
        );
    }

    #[test]
    fn missing_credential_disables_the_mailer() {
        let client = reqwest::Client::new();
        assert!(!MailjetMailer::from_keys(client.clone(), Some("key".into()), None).is_enabled());
        assert!(!MailjetMailer::from_keys(client.clone(), None, Some("secret".into())).is_enabled());
        assert!(!MailjetMailer::from_keys(client.clone(), Some(String::new()), Some("s".into())).is_enabled());
        assert!(MailjetMailer::from_keys(client, Some("key".into()), Some("secret".into())).is_enabled());
    }

    #[tokio::test]
    async fn disabled_mailer_skips_without_error() {
        let mailer = MailjetMailer::disabled(reqwest::Client::new())
            .with_endpoint("http://127.0.0.1:9/unreachable");
        let delivery = mailer.send("ana@example.com", "Hi", "Body").await.unwrap();
        assert_eq!(delivery, Delivery::Skipped);
    }
}
