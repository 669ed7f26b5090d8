//! Error types for the core library.

use thiserror::Error;

use crate::session::SessionId;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No session exists for the given ID; the user must log in.
    #[error("Not authenticated: no session {0}")]
    Unauthenticated(SessionId),

    /// The identity provider rejected the refresh grant; the session has
    /// been dropped and the user must re-authenticate.
    #[error("Token refresh failed for session {session}: {reason}")]
    RefreshFailed {
        /// Session that held the rejected grant.
        session: SessionId,
        /// Provider-reported reason.
        reason: String,
    },

    /// A remote API rejected the bearer token (HTTP 401/403).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transient failure against the record store (network, rate limit,
    /// server error). Retried by the update queue.
    #[error("Record store error: {0}")]
    Store(String),

    /// The mail provider rejected or failed a send.
    #[error("Mailer error: {0}")]
    Mailer(String),

    /// The update queue dropped a task before completion.
    #[error("Update queue error: {0}")]
    Queue(String),

    /// OAuth protocol error.
    #[error("OAuth error: {0}")]
    OAuth(#[from] leadcast_oauth::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] crate::session::credentials::CredentialError),
}

impl Error {
    /// Returns true for authentication-class failures.
    ///
    /// The update queue never retries these: retrying with the same stale
    /// credential cannot succeed.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_) | Self::RefreshFailed { .. } | Self::Unauthorized(_)
        )
    }

    /// Returns true for failures worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Mailer(_) | Self::Http(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
