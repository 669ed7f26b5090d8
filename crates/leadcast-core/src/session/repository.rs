//! Session storage repository.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, warn};

use super::credentials;
use super::model::{Session, SessionId};
use crate::Result;

/// Repository for session persistence across restarts.
///
/// Refresh tokens are stored in the system keyring; the database row keeps
/// a placeholder. Sessions loaded from here carry no live access token and
/// come back flagged `needs_refresh`.
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                account_email TEXT NOT NULL,
                refresh_token TEXT NOT NULL DEFAULT '',
                expires_at TEXT,
                scopes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Save all sessions (upsert by session ID).
    ///
    /// Refresh tokens go to the system keyring; a keyring failure is logged
    /// and the row is written anyway so the session identity survives.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub async fn save_all(&self, sessions: &[Session]) -> Result<()> {
        // Placeholder in DB, real token in keyring
        let db_token_placeholder = "";

        for session in sessions {
            if let Some(refresh_token) = &session.refresh_token
                && let Err(e) = credentials::store_refresh_token(&session.id, refresh_token)
            {
                warn!(session = %session.id, error = %e, "failed to store refresh token in keyring");
            }

            sqlx::query(
                r"
                INSERT INTO sessions (
                    session_id, account_email, refresh_token, expires_at, scopes, created_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(session_id) DO UPDATE SET
                    account_email = excluded.account_email,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    scopes = excluded.scopes,
                    updated_at = CURRENT_TIMESTAMP
                ",
            )
            .bind(session.id.as_str())
            .bind(&session.account_email)
            .bind(db_token_placeholder)
            .bind(session.expires_at.map(|t| t.to_rfc3339()))
            .bind(session.scopes.join(" "))
            .bind(session.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }

        debug!(count = sessions.len(), "sessions persisted");
        Ok(())
    }

    /// Load all persisted sessions.
    ///
    /// Every returned session is flagged `needs_refresh`: the access token
    /// is gone and must be renewed before use.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn load(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r"
            SELECT session_id, account_email, refresh_token, expires_at, scopes, created_at
            FROM sessions
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let sessions = rows.iter().map(row_to_session).collect();
        Ok(sessions)
    }

    /// Delete a persisted session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Convert a database row to a Session.
///
/// Loads the refresh token from the system keyring first, falling back to
/// the database column for rows written before keyring storage existed.
fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Session {
    let id = SessionId::new(row.get::<String, _>("session_id"));

    let refresh_token = match credentials::get_refresh_token(&id) {
        Ok(Some(token)) => Some(token),
        Ok(None) => {
            let db_token: String = row.get("refresh_token");
            (!db_token.is_empty()).then_some(db_token)
        }
        Err(e) => {
            warn!(session = %id, error = %e, "failed to load refresh token from keyring");
            let db_token: String = row.get("refresh_token");
            (!db_token.is_empty()).then_some(db_token)
        }
    };

    let scopes_raw: String = row.get("scopes");
    let scopes = if scopes_raw.is_empty() {
        Vec::new()
    } else {
        scopes_raw.split_whitespace().map(str::to_string).collect()
    };

    Session {
        id,
        account_email: row.get("account_email"),
        access_token: String::new(),
        refresh_token,
        expires_at: row
            .get::<Option<String>, _>("expires_at")
            .and_then(|t| t.parse().ok()),
        scopes,
        needs_refresh: true,
        created_at: row
            .get::<String, _>("created_at")
            .parse()
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}
