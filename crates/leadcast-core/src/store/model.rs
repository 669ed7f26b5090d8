//! Lead model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalizes an email address for use as a row key.
///
/// Keys are case-insensitive and trimmed; every lookup, cache entry, and
/// queue lane uses this form.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Delivery status of a lead.
///
/// `Read` and `Clicked` are written by external tracking, never by this
/// service; they still count as "already contacted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeadStatus {
    /// Never contacted.
    #[default]
    New,
    /// Campaign mail sent.
    Sent,
    /// Recipient opened the mail (external tracking).
    Read,
    /// Recipient clicked a link (external tracking).
    Clicked,
    /// Recipient replied.
    Replied,
    /// Delivery bounced.
    Bounced,
    /// Recipient unsubscribed.
    Unsubscribed,
    /// Send attempt failed.
    Failed,
}

impl LeadStatus {
    /// True for statuses that permanently exclude a lead from sending.
    ///
    /// Terminal statuses are monotonic: once a lead is Replied, Bounced, or
    /// Unsubscribed it is never re-selected and never downgraded.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Replied | Self::Bounced | Self::Unsubscribed)
    }

    /// Sheet cell value for the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Sent => "Sent",
            Self::Read => "Read",
            Self::Clicked => "Clicked",
            Self::Replied => "Replied",
            Self::Bounced => "Bounced",
            Self::Unsubscribed => "Unsubscribed",
            Self::Failed => "Failed",
        }
    }

    /// Parses a sheet cell value, tolerant of case and whitespace.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "sent" => Self::Sent,
            "read" | "opened" => Self::Read,
            "clicked" => Self::Clicked,
            "replied" => Self::Replied,
            "bounced" => Self::Bounced,
            "unsubscribed" => Self::Unsubscribed,
            "failed" => Self::Failed,
            _ => Self::New,
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row in the remote lead sheet, keyed by email.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lead {
    /// Row key (normalized email address).
    pub email: String,
    /// Contact name, used for message rendering.
    pub name: Option<String>,
    /// Company, used for message rendering.
    pub company: Option<String>,
    /// Delivery status.
    pub status: LeadStatus,
    /// When the last campaign mail went out.
    pub last_email_date: Option<DateTime<Utc>>,
    /// Earliest time the next mail may go out.
    pub next_email_date: Option<DateTime<Utc>>,
    /// Number of campaign mails sent so far.
    pub email_count: u32,
    /// Template used for the last send.
    pub template_used: Option<String>,
    /// Campaign the lead belongs to.
    pub campaign_id: Option<String>,
}

impl Lead {
    /// Creates a new lead for the given address.
    #[must_use]
    pub fn new(email: &str) -> Self {
        Self {
            email: normalize_email(email),
            ..Self::default()
        }
    }

    /// True when the lead may be selected for a campaign send.
    ///
    /// Terminal statuses are excluded permanently; a `next_email_date` in
    /// the future defers the lead.
    #[must_use]
    pub fn is_sendable(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if !matches!(self.status, LeadStatus::New | LeadStatus::Failed) {
            return false;
        }
        self.next_email_date.is_none_or(|next| next <= now)
    }
}
