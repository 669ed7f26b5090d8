//! Outbound mail sending.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use tracing::debug;

use crate::session::{SessionId, SessionManager};
use crate::{Error, Result};

/// Connect timeout for mail API requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout for mail API requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An email message to send.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html_body: String,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
        }
    }
}

/// Sends one message at a time.
///
/// Pacing, duplicate detection, and retries all live with the caller; an
/// implementation only moves one message.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends a single message.
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

/// [`Mailer`] over the mail provider's REST send endpoint.
pub struct RestMailer {
    http: Client,
    base_url: Url,
    sessions: Arc<SessionManager>,
    session_id: SessionId,
}

impl RestMailer {
    /// Creates a mailer bound to one session's credentials.
    #[must_use]
    pub fn new(base_url: Url, sessions: Arc<SessionManager>, session_id: SessionId) -> Self {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            base_url,
            sessions,
            session_id,
        }
    }

    fn send_url(&self) -> Result<Url> {
        self.base_url
            .join("sendMail")
            .map_err(|e| Error::Config(format!("invalid mail base URL: {e}")))
    }
}

#[async_trait]
impl Mailer for RestMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        if message.to.trim().is_empty() {
            return Err(Error::Mailer("no recipient specified".into()));
        }

        let token = self.sessions.get_access_token(&self.session_id).await?;
        let payload = json!({
            "message": {
                "subject": message.subject,
                "body": {
                    "contentType": "HTML",
                    "content": message.html_body,
                },
                "toRecipients": [
                    { "emailAddress": { "address": message.to } }
                ],
            },
            "saveToSentItems": true,
        });

        let response = self
            .http
            .post(self.send_url()?)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Mailer(format!("send failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!("mail API returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Mailer(format!("mail API returned {status}: {body}")));
        }

        debug!(to = %message.to, subject = %message.subject, "message sent");
        Ok(())
    }
}
