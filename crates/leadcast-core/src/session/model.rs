//! Session model types.

use chrono::{DateTime, Duration, Utc};
use leadcast_oauth::Token;
use serde::{Deserialize, Serialize};

/// Minutes of remaining lifetime below which a token is treated as unusable.
const VALIDITY_WINDOW_MINUTES: i64 = 5;

/// Opaque identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new session ID from an opaque key.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An authenticated user session.
///
/// The access token is owned exclusively by the
/// [`SessionManager`](super::SessionManager); callers receive a clone of the
/// token string, never the session itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session key.
    pub id: SessionId,
    /// Username/email of the authenticated account.
    pub account_email: String,
    /// Short-lived bearer token.
    pub access_token: String,
    /// Long-lived refresh token (persisted via the system keyring).
    pub refresh_token: Option<String>,
    /// Access token expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted permission scopes.
    pub scopes: Vec<String>,
    /// Set when the session was restored from storage without a live
    /// access token; cleared by the first successful refresh.
    pub needs_refresh: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session from a freshly exchanged token.
    #[must_use]
    pub fn from_token(id: SessionId, account_email: impl Into<String>, token: &Token) -> Self {
        let scopes = token
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            id,
            account_email: account_email.into(),
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token.expires_at,
            scopes,
            needs_refresh: false,
            created_at: Utc::now(),
        }
    }

    /// Returns true while the access token has more than 5 minutes of life.
    #[must_use]
    pub fn token_is_valid(&self) -> bool {
        !self.needs_refresh
            && self.expires_at.is_some_and(|exp| {
                exp - Utc::now() > Duration::minutes(VALIDITY_WINDOW_MINUTES)
            })
    }

    /// Returns true if the token expires within the given number of minutes.
    #[must_use]
    pub fn expires_within(&self, minutes: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::minutes(minutes) >= exp)
    }

    /// Applies a refreshed token in place, preserving the old refresh token
    /// when the provider did not return a new one.
    pub fn apply_token(&mut self, token: &Token) {
        self.access_token.clone_from(&token.access_token);
        self.expires_at = token.expires_at;
        if token.refresh_token.is_some() {
            self.refresh_token.clone_from(&token.refresh_token);
        }
        self.needs_refresh = false;
    }

    /// Reconstructs the manager's view of the token for the refresh call.
    #[must_use]
    pub fn as_token(&self) -> Token {
        let mut token = Token::new(self.access_token.clone(), "Bearer");
        if let Some(exp) = self.expires_at {
            token = token.with_expires_at(exp);
        }
        if let Some(refresh) = &self.refresh_token {
            token = token.with_refresh_token(refresh.clone());
        }
        token
    }
}
