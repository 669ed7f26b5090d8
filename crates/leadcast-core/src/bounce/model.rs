//! Bounce record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Class of delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BounceType {
    /// Permanent failure; the address is dead.
    Hard,
    /// Recoverable failure (full mailbox, quota).
    Soft,
    /// Transient deferral; the provider may still deliver.
    Temporary,
}

impl BounceType {
    /// Display label for the sheet.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hard => "Hard",
            Self::Soft => "Soft",
            Self::Temporary => "Temporary",
        }
    }
}

impl std::fmt::Display for BounceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified delivery failure.
///
/// Derived transiently from an inbound message and consumed immediately to
/// produce a lead update; never stored on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BounceRecord {
    /// Address the failed campaign mail was sent to.
    pub original_recipient: String,
    /// Failure class.
    pub bounce_type: BounceType,
    /// Human-readable failure reason.
    pub bounce_reason: String,
    /// When the bounce notification arrived.
    pub bounce_date: DateTime<Utc>,
    /// ID of the notification message it was derived from.
    pub source_message_id: String,
}
