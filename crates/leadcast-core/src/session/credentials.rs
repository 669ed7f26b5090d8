//! Secure credential storage using system keyring.
//!
//! Refresh tokens never land in the session database; they go to the
//! platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use keyring::Entry;
use tracing::debug;

use super::SessionId;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "leadcast";

/// Credential type identifier for `OAuth2` refresh tokens.
const REFRESH_TOKEN_CREDENTIAL: &str = "refresh_token";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Generates the keyring entry key for a credential.
fn credential_key(session_id: &SessionId, credential_type: &str) -> String {
    format!("{SERVICE_NAME}_{credential_type}_{}", session_id.as_str())
}

/// Stores a refresh token securely in the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn store_refresh_token(session_id: &SessionId, refresh_token: &str) -> CredentialResult<()> {
    let key = credential_key(session_id, REFRESH_TOKEN_CREDENTIAL);
    let entry = Entry::new(SERVICE_NAME, &key)?;
    entry.set_password(refresh_token)?;
    debug!("Stored refresh token for session {session_id}");
    Ok(())
}

/// Retrieves a refresh token from the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn get_refresh_token(session_id: &SessionId) -> CredentialResult<Option<String>> {
    let key = credential_key(session_id, REFRESH_TOKEN_CREDENTIAL);
    let entry = Entry::new(SERVICE_NAME, &key)?;
    match entry.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => {
            debug!("No refresh token found for session {session_id}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes the refresh token for a session.
///
/// # Errors
///
/// Returns an error if the keyring operation fails. A missing entry is not
/// an error.
pub fn delete_refresh_token(session_id: &SessionId) -> CredentialResult<()> {
    let key = credential_key(session_id, REFRESH_TOKEN_CREDENTIAL);
    let entry = Entry::new(SERVICE_NAME, &key)?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn credential_key_includes_session() {
        let key = credential_key(&SessionId::new("abc123"), REFRESH_TOKEN_CREDENTIAL);
        assert_eq!(key, "leadcast_refresh_token_abc123");
    }
}
