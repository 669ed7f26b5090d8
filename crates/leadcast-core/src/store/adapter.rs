//! REST adapter for the remote lead sheet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use super::fields::record_to_lead;
use super::model::{Lead, normalize_email};
use crate::session::{SessionId, SessionManager};
use crate::{Error, Result};

/// Connect timeout for sheet API requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout for sheet API requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Narrow interface over the remote lead store.
///
/// Implementations are stateless; retry and serialization live in the
/// update queue, never here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads every lead row.
    async fn find_all(&self) -> Result<Vec<Lead>>;

    /// Finds one lead by email (case-insensitive, trimmed).
    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>>;

    /// Patches named fields on the row keyed by email.
    ///
    /// Returns false when no matching row exists.
    async fn patch(&self, email: &str, fields: &HashMap<String, Value>) -> Result<bool>;
}

/// [`RecordStore`] over the spreadsheet provider's rows API.
///
/// Every call fetches a fresh bearer token from the session manager, so a
/// token refreshed mid-sweep is picked up without plumbing.
pub struct SheetStore {
    http: Client,
    base_url: Url,
    sessions: Arc<SessionManager>,
    session_id: SessionId,
}

impl SheetStore {
    /// Creates an adapter bound to one session's credentials.
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

    fn rows_url(&self) -> Result<Url> {
        self.base_url
            .join("rows")
            .map_err(|e| Error::Config(format!("invalid sheet base URL: {e}")))
    }

    fn row_url(&self, email: &str) -> Result<Url> {
        self.base_url
            .join(&format!("rows/{}", normalize_email(email)))
            .map_err(|e| Error::Config(format!("invalid sheet base URL: {e}")))
    }

    fn map_status(status: StatusCode, body: &str) -> Error {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Error::Unauthorized(format!("sheet API returned {status}"))
        } else {
            Error::Store(format!("sheet API returned {status}: {body}"))
        }
    }
}

#[async_trait]
impl RecordStore for SheetStore {
    async fn find_all(&self) -> Result<Vec<Lead>> {
        let token = self.sessions.get_access_token(&self.session_id).await?;
        let response = self
            .http
            .get(self.rows_url()?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Store(format!("sheet read failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        let rows: Vec<HashMap<String, Value>> = response
            .json()
            .await
            .map_err(|e| Error::Store(format!("malformed sheet response: {e}")))?;

        let leads: Vec<Lead> = rows.iter().filter_map(record_to_lead).collect();
        debug!(rows = rows.len(), leads = leads.len(), "lead sheet read");
        Ok(leads)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>> {
        let token = self.sessions.get_access_token(&self.session_id).await?;
        let response = self
            .http
            .get(self.row_url(email)?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Store(format!("sheet read failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        let row: HashMap<String, Value> = response
            .json()
            .await
            .map_err(|e| Error::Store(format!("malformed sheet response: {e}")))?;

        Ok(record_to_lead(&row))
    }

    async fn patch(&self, email: &str, fields: &HashMap<String, Value>) -> Result<bool> {
        let token = self.sessions.get_access_token(&self.session_id).await?;
        let response = self
            .http
            .patch(self.row_url(email)?)
            .bearer_auth(token)
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| Error::Store(format!("sheet patch failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        debug!(email = %normalize_email(email), fields = fields.len(), "lead patched");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_statuses_map_to_auth_errors() {
        let err = SheetStore::map_status(StatusCode::UNAUTHORIZED, "");
        assert!(err.is_auth());
        let err = SheetStore::map_status(StatusCode::FORBIDDEN, "");
        assert!(err.is_auth());
    }

    #[test]
    fn server_errors_map_to_transient_store_errors() {
        let err = SheetStore::map_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(err.is_transient());
        let err = SheetStore::map_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
    }
}
