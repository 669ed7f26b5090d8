//! Token lifecycle manager.
//!
//! Owns the in-memory session map and every access token in it. All
//! mutation goes through `&self` methods guarded by an `RwLock`; background
//! sweeps and operator requests share one manager behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use leadcast_oauth::{OAuthClient, Token};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::credentials;
use super::model::{Session, SessionId};
use super::repository::SessionRepository;
use crate::{Error, Result};

/// Tokens expiring within this window are picked up by the proactive sweep.
const PROACTIVE_REFRESH_MINUTES: i64 = 15;

/// Refreshes a token against the identity provider.
///
/// The production implementation is [`OAuthClient`]; tests substitute a
/// scripted refresher.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges a refresh token for a new access token.
    async fn refresh(&self, token: &Token) -> leadcast_oauth::Result<Token>;
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, token: &Token) -> leadcast_oauth::Result<Token> {
        self.refresh_token(token).await
    }
}

/// Per-session outcome of a proactive refresh sweep.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Session the refresh ran for.
    pub session_id: SessionId,
    /// Whether the refresh succeeded.
    pub refreshed: bool,
    /// Failure description, if any.
    pub error: Option<String>,
}

/// Aggregate result of a proactive refresh sweep.
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    /// Number of sessions the sweep attempted to refresh.
    pub attempted: usize,
    /// Number refreshed successfully.
    pub refreshed: usize,
    /// Per-session outcomes.
    pub outcomes: Vec<RefreshOutcome>,
}

impl RefreshSummary {
    /// Number of sessions whose refresh failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.attempted - self.refreshed
    }
}

/// Owns OAuth credential state for every active session.
pub struct SessionManager {
    refresher: Arc<dyn TokenRefresher>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    repository: Option<Arc<SessionRepository>>,
}

impl SessionManager {
    /// Creates a manager that refreshes tokens through the given OAuth client.
    #[must_use]
    pub fn new(oauth: OAuthClient) -> Self {
        Self::with_refresher(Arc::new(oauth))
    }

    /// Creates a manager with a custom token refresher.
    #[must_use]
    pub fn with_refresher(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher,
            sessions: RwLock::new(HashMap::new()),
            repository: None,
        }
    }

    /// Attaches a persistence repository.
    ///
    /// Persistence is best-effort: session state in memory stays
    /// authoritative for the process lifetime.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<SessionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Creates a session from a completed code exchange and persists it.
    pub async fn create_session(
        &self,
        id: SessionId,
        account_email: impl Into<String>,
        token: &Token,
    ) {
        let session = Session::from_token(id.clone(), account_email, token);
        info!(session = %id, account = %session.account_email, "session created");
        self.sessions.write().await.insert(id, session);
        self.spawn_persist().await;
    }

    /// Returns a usable bearer token for the session.
    ///
    /// A stored token with more than 5 minutes of life is returned as-is;
    /// otherwise one refresh is attempted.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unauthenticated`] when no session exists, or with
    /// the refresh failure when the token cannot be renewed.
    pub async fn get_access_token(&self, id: &SessionId) -> Result<String> {
        {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(id)
                .ok_or_else(|| Error::Unauthenticated(id.clone()))?;
            if session.token_is_valid() {
                return Ok(session.access_token.clone());
            }
        }

        self.refresh(id).await
    }

    /// Forces a token refresh for the session.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unauthenticated`] when no session exists. A
    /// terminal provider rejection (revoked or missing grant) removes the
    /// session and fails with [`Error::RefreshFailed`]; transient network
    /// failure propagates without touching the session.
    pub async fn refresh(&self, id: &SessionId) -> Result<String> {
        let token = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(id)
                .ok_or_else(|| Error::Unauthenticated(id.clone()))?;
            session.as_token()
        };

        if token.refresh_token.is_none() {
            self.drop_session(id).await;
            return Err(Error::RefreshFailed {
                session: id.clone(),
                reason: "no refresh token".into(),
            });
        }

        match self.refresher.refresh(&token).await {
            Ok(renewed) => {
                let access_token = renewed.access_token.clone();
                {
                    let mut sessions = self.sessions.write().await;
                    if let Some(session) = sessions.get_mut(id) {
                        session.apply_token(&renewed);
                    }
                }
                debug!(session = %id, "access token refreshed");
                self.spawn_persist().await;
                Ok(access_token)
            }
            Err(e) if e.is_terminal() => {
                warn!(session = %id, error = %e, "refresh grant rejected, dropping session");
                self.drop_session(id).await;
                Err(Error::RefreshFailed {
                    session: id.clone(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(Error::OAuth(e)),
        }
    }

    /// Proactively refreshes sessions close to expiry.
    ///
    /// Picks up every session expiring within 15 minutes or flagged
    /// `needs_refresh`, runs all refreshes concurrently, and collects
    /// per-session outcomes; one failure never aborts the others.
    pub async fn refresh_expiring_sessions(self: &Arc<Self>) -> RefreshSummary {
        let due: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.needs_refresh || s.expires_within(PROACTIVE_REFRESH_MINUTES))
                .map(|s| s.id.clone())
                .collect()
        };

        let mut summary = RefreshSummary {
            attempted: due.len(),
            ..RefreshSummary::default()
        };

        let mut tasks = JoinSet::new();
        for id in due {
            let manager = Arc::clone(self);
            tasks.spawn(async move {
                let result = manager.refresh(&id).await;
                (id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(_))) => {
                    summary.refreshed += 1;
                    summary.outcomes.push(RefreshOutcome {
                        session_id: id,
                        refreshed: true,
                        error: None,
                    });
                }
                Ok((id, Err(e))) => {
                    warn!(session = %id, error = %e, "proactive refresh failed");
                    summary.outcomes.push(RefreshOutcome {
                        session_id: id,
                        refreshed: false,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => warn!(error = %e, "refresh task panicked"),
            }
        }

        info!(
            attempted = summary.attempted,
            refreshed = summary.refreshed,
            "proactive refresh sweep finished"
        );
        summary
    }

    /// Removes a session on explicit logout.
    pub async fn remove_session(&self, id: &SessionId) {
        info!(session = %id, "session removed");
        self.drop_session(id).await;
    }

    /// Restores persisted sessions at startup.
    ///
    /// Restored sessions carry no live access token and are flagged
    /// `needs_refresh`; the proactive sweep renews them.
    ///
    /// # Errors
    ///
    /// Returns an error if loading from the repository fails.
    pub async fn restore(&self) -> Result<usize> {
        let Some(repository) = &self.repository else {
            return Ok(0);
        };

        let restored = repository.load().await?;
        let count = restored.len();
        let mut sessions = self.sessions.write().await;
        for session in restored {
            sessions.insert(session.id.clone(), session);
        }
        info!(count, "sessions restored from storage");
        Ok(count)
    }

    /// Drops sessions that expired and hold no refresh token.
    ///
    /// Returns the number of sessions removed.
    pub async fn cleanup_stale(&self) -> usize {
        let stale: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.refresh_token.is_none() && !s.token_is_valid())
                .map(|s| s.id.clone())
                .collect()
        };

        for id in &stale {
            debug!(session = %id, "dropping stale session");
            self.drop_session(id).await;
        }
        stale.len()
    }

    /// IDs of all active sessions, for sweep iteration.
    pub async fn active_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Account email for a session, if it exists.
    pub async fn account_email(&self, id: &SessionId) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.account_email.clone())
    }

    /// Number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn drop_session(&self, id: &SessionId) {
        self.sessions.write().await.remove(id);

        if let Err(e) = credentials::delete_refresh_token(id) {
            warn!(session = %id, error = %e, "failed to delete refresh token from keyring");
        }

        if let Some(repository) = &self.repository {
            let repository = Arc::clone(repository);
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = repository.delete(&id).await {
                    warn!(session = %id, error = %e, "failed to delete persisted session");
                }
            });
        }
    }

    /// Schedules an asynchronous, non-blocking persist of session state.
    ///
    /// Persistence failure is logged, never propagated.
    async fn spawn_persist(&self) {
        let Some(repository) = &self.repository else {
            return;
        };

        let snapshot: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        let repository = Arc::clone(repository);
        tokio::spawn(async move {
            if let Err(e) = repository.save_all(&snapshot).await {
                warn!(error = %e, "session persistence failed");
            }
        });
    }
}
