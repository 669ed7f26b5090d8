//! Inbound mail listing for the reply and bounce sweeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::session::{SessionId, SessionManager};
use crate::{Error, Result};

/// Connect timeout for mail API requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout for mail API requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An inbound message as the sweeps see it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Provider message ID.
    pub id: String,
    /// Sender address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body (or preview when the provider offers nothing more).
    pub body: String,
    /// When the message arrived.
    pub received_at: DateTime<Utc>,
}

/// Read-only view of the account's inbox.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Lists messages received at or after `since`, newest last.
    async fn recent_messages(&self, since: DateTime<Utc>) -> Result<Vec<InboundMessage>>;
}

/// Wire format of one message from the mail provider's list endpoint.
#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    from: String,
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(rename = "receivedAt")]
    received_at: DateTime<Utc>,
}

/// [`Mailbox`] over the mail provider's REST message listing.
pub struct RestMailbox {
    http: Client,
    base_url: Url,
    sessions: Arc<SessionManager>,
    session_id: SessionId,
}

impl RestMailbox {
    /// Creates a mailbox reader bound to one session's credentials.
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

    fn messages_url(&self) -> Result<Url> {
        self.base_url
            .join("messages")
            .map_err(|e| Error::Config(format!("invalid mail base URL: {e}")))
    }
}

#[async_trait]
impl Mailbox for RestMailbox {
    async fn recent_messages(&self, since: DateTime<Utc>) -> Result<Vec<InboundMessage>> {
        let token = self.sessions.get_access_token(&self.session_id).await?;
        let response = self
            .http
            .get(self.messages_url()?)
            .query(&[("since", since.to_rfc3339())])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Mailer(format!("inbox read failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!("mail API returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Mailer(format!("mail API returned {status}: {body}")));
        }

        let wire: Vec<WireMessage> = response
            .json()
            .await
            .map_err(|e| Error::Mailer(format!("malformed inbox response: {e}")))?;

        let messages: Vec<InboundMessage> = wire
            .into_iter()
            .map(|m| InboundMessage {
                id: m.id,
                from: m.from,
                subject: m.subject,
                body: m.body,
                received_at: m.received_at,
            })
            .collect();

        debug!(count = messages.len(), "inbox messages fetched");
        Ok(messages)
    }
}
