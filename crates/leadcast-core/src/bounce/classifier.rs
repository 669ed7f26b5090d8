//! The bounce classifier.

use regex::Regex;
use tracing::debug;

use super::model::{BounceRecord, BounceType};
use crate::service::InboundMessage;
use crate::store::normalize_email;

/// Subject phrases that mark a message as a bounce candidate.
const BOUNCE_SUBJECTS: &[&str] = &[
    "undelivered",
    "undeliverable",
    "delivery status notification",
    "delivery notification",
    "mail delivery failed",
    "mail delivery failure",
    "delivery failure",
    "failure notice",
    "returned mail",
    "returned to sender",
    "mail system error",
];

/// Sender fragments that mark a message as coming from a bounce system.
const BOUNCE_SENDERS: &[&str] = &[
    "postmaster",
    "mailer-daemon",
    "mail-daemon",
    "mailerdaemon",
    "noreply",
    "no-reply",
    "microsoftexchange",
];

/// Hard bounce reasons: permanent failures. First match wins, so textual
/// reasons come before bare SMTP codes.
const HARD_REASONS: &[(&str, &str)] = &[
    ("mailbox unavailable", "Mailbox unavailable"),
    ("mailbox not found", "Mailbox not found"),
    ("user unknown", "Unknown user"),
    ("unknown user", "Unknown user"),
    ("no such user", "Unknown user"),
    ("address not found", "Address not found"),
    ("does not exist", "Recipient does not exist"),
    ("invalid recipient", "Invalid recipient"),
    ("recipient address rejected", "Recipient address rejected"),
    ("domain not found", "Domain not found"),
    ("host not found", "Domain not found"),
    ("550", "SMTP 550 permanent failure"),
    ("551", "SMTP 551 user not local"),
    ("553", "SMTP 553 mailbox name invalid"),
    ("554", "SMTP 554 transaction failed"),
];

/// Soft bounce reasons: the address exists but delivery failed.
const SOFT_REASONS: &[(&str, &str)] = &[
    ("mailbox full", "Mailbox full"),
    ("over quota", "Mailbox over quota"),
    ("quota exceeded", "Mailbox over quota"),
    ("insufficient storage", "Insufficient storage"),
    ("421", "SMTP 421 service not available"),
    ("450", "SMTP 450 mailbox busy"),
    ("451", "SMTP 451 local error"),
    ("452", "SMTP 452 insufficient system storage"),
];

/// Temporary deferrals: the provider may still deliver.
const TEMP_REASONS: &[(&str, &str)] = &[
    ("greylisted", "Greylisted"),
    ("deferred", "Delivery deferred"),
    ("queued", "Delivery queued"),
    ("timed out", "Delivery timed out"),
    ("timeout", "Delivery timed out"),
    ("temporarily unavailable", "Recipient temporarily unavailable"),
    ("try again later", "Recipient temporarily unavailable"),
];

/// Ordered recipient-extraction patterns, most specific first. Applied to
/// the body, then the subject.
const RECIPIENT_PATTERNS: &[&str] = &[
    r"(?i)final-recipient:\s*rfc822;\s*<?([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})>?",
    r"(?i)original-recipient:\s*rfc822;\s*<?([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})>?",
    r"(?i)your (?:message|email) to\s+<?([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})>?",
    r"(?i)delivery to the following recipients? failed[^A-Za-z0-9]*<?([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})>?",
    r"(?i)(?:recipient|to):\s*<?([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})>?",
    r"<([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})>",
];

/// Loose email shape for the fallback scan.
const EMAIL_SHAPE: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

/// Classifies inbound messages as delivery failures.
pub struct BounceClassifier {
    recipient_patterns: Vec<Regex>,
    email_shape: Option<Regex>,
}

impl Default for BounceClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BounceClassifier {
    /// Creates a classifier with the built-in pattern tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            recipient_patterns: RECIPIENT_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            email_shape: Regex::new(EMAIL_SHAPE).ok(),
        }
    }

    /// Classifies a message, returning a record for detected bounces.
    ///
    /// Returns `None` for ordinary mail and for bounce candidates whose
    /// original recipient cannot be recovered (unclassifiable, not an
    /// error).
    #[must_use]
    pub fn classify(&self, message: &InboundMessage) -> Option<BounceRecord> {
        if !Self::is_bounce_candidate(message) {
            return None;
        }

        let Some(recipient) = self.extract_recipient(message) else {
            debug!(message_id = %message.id, "bounce candidate without recoverable recipient, discarding");
            return None;
        };

        let (bounce_type, bounce_reason) = Self::classify_reason(&message.body);

        Some(BounceRecord {
            original_recipient: recipient,
            bounce_type,
            bounce_reason,
            bounce_date: message.received_at,
            source_message_id: message.id.clone(),
        })
    }

    /// Coarse candidate filter: subject phrase or bounce-system sender.
    fn is_bounce_candidate(message: &InboundMessage) -> bool {
        let subject = message.subject.to_lowercase();
        if BOUNCE_SUBJECTS.iter().any(|s| subject.contains(s)) {
            return true;
        }
        Self::is_system_address(&message.from)
    }

    /// True for addresses that belong to mail infrastructure rather than a
    /// human.
    fn is_system_address(address: &str) -> bool {
        let address = address.to_lowercase();
        BOUNCE_SENDERS.iter().any(|s| address.contains(s))
    }

    /// Recovers the original recipient: ordered patterns against the body,
    /// then the subject, then a scan of all email-shaped substrings minus
    /// system addresses.
    fn extract_recipient(&self, message: &InboundMessage) -> Option<String> {
        for pattern in &self.recipient_patterns {
            for text in [&message.body, &message.subject] {
                if let Some(captures) = pattern.captures(text)
                    && let Some(address) = captures.get(1)
                {
                    let address = address.as_str();
                    if !Self::is_system_address(address) {
                        return Some(normalize_email(address));
                    }
                }
            }
        }

        let shape = self.email_shape.as_ref()?;
        shape
            .find_iter(&message.body)
            .map(|m| m.as_str())
            .find(|address| !Self::is_system_address(address))
            .map(normalize_email)
    }

    /// Classifies the failure reason from the notification body.
    ///
    /// Tables are checked Hard, then Soft, then Temporary; first match
    /// wins. A detected bounce with no matching reason still yields a
    /// record, defaulting to Soft.
    fn classify_reason(body: &str) -> (BounceType, String) {
        let body = body.to_lowercase();

        for (pattern, reason) in HARD_REASONS {
            if body.contains(pattern) {
                return (BounceType::Hard, (*reason).to_string());
            }
        }
        for (pattern, reason) in SOFT_REASONS {
            if body.contains(pattern) {
                return (BounceType::Soft, (*reason).to_string());
            }
        }
        for (pattern, reason) in TEMP_REASONS {
            if body.contains(pattern) {
                return (BounceType::Temporary, (*reason).to_string());
            }
        }

        (BounceType::Soft, "Unknown bounce reason".to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(from: &str, subject: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: "msg-1".to_string(),
            from: from.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn ordinary_mail_is_not_a_bounce() {
        let msg = message(
            "jane@example.com",
            "Re: Quick question",
            "Thanks, sounds interesting!",
        );
        assert!(BounceClassifier::new().classify(&msg).is_none());
    }

    #[test]
    fn undelivered_with_550_is_hard() {
        let msg = message(
            "MAILER-DAEMON@mx.example.net",
            "Undelivered Mail Returned to Sender",
            "Your message to <lead@startup.io> could not be delivered.\n\
             550 mailbox unavailable",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.original_recipient, "lead@startup.io");
        assert_eq!(record.bounce_type, BounceType::Hard);
        assert!(record.bounce_reason.contains("Mailbox unavailable"));
        assert_eq!(record.source_message_id, "msg-1");
    }

    #[test]
    fn sender_pattern_alone_marks_candidate() {
        let msg = message(
            "postmaster@corp.example.com",
            "Message blocked",
            "Delivery to the following recipient failed: target@client.org\n\
             Reason: mailbox full",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.original_recipient, "target@client.org");
        assert_eq!(record.bounce_type, BounceType::Soft);
        assert_eq!(record.bounce_reason, "Mailbox full");
    }

    #[test]
    fn exchange_ndr_sender_is_detected() {
        let msg = message(
            "MicrosoftExchange329e71ec88ae4615bbc36ab6ce41109e@corp.example.com",
            "Undeliverable: Intro",
            "Your message to someone@client.org couldn't be delivered.\n\
             user unknown",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.bounce_type, BounceType::Hard);
        assert_eq!(record.bounce_reason, "Unknown user");
    }

    #[test]
    fn dsn_final_recipient_header_wins() {
        let msg = message(
            "mailer-daemon@mx.example.net",
            "Delivery Status Notification (Failure)",
            "Reporting-MTA: dns; mx.example.net\n\
             Final-Recipient: rfc822; real.target@client.org\n\
             Action: failed\n\
             Status: 5.1.1",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.original_recipient, "real.target@client.org");
    }

    #[test]
    fn fallback_scan_skips_system_addresses() {
        let msg = message(
            "mailer-daemon@mx.example.net",
            "failure notice",
            "This report was generated by postmaster@mx.example.net regarding\n\
             a message for victim@client.org which was greylisted",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.original_recipient, "victim@client.org");
        assert_eq!(record.bounce_type, BounceType::Temporary);
        assert_eq!(record.bounce_reason, "Greylisted");
    }

    #[test]
    fn candidate_without_recipient_is_discarded() {
        let msg = message(
            "mailer-daemon@mx.example.net",
            "Mail delivery failed",
            "Something went wrong but no address survived.",
        );
        assert!(BounceClassifier::new().classify(&msg).is_none());
    }

    #[test]
    fn unmatched_reason_defaults_to_soft_unknown() {
        let msg = message(
            "mailer-daemon@mx.example.net",
            "Mail delivery failed",
            "Could not deliver to stranger@client.org for inscrutable reasons.",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.bounce_type, BounceType::Soft);
        assert_eq!(record.bounce_reason, "Unknown bounce reason");
    }

    #[test]
    fn soft_codes_classify_as_soft() {
        let msg = message(
            "mailer-daemon@mx.example.net",
            "Mail delivery failed",
            "Delivery to quota@client.org failed: 452 insufficient system storage",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.bounce_type, BounceType::Soft);
    }

    #[test]
    fn recipient_extraction_normalizes_case() {
        let msg = message(
            "mailer-daemon@mx.example.net",
            "Undeliverable",
            "Your message to <Big.Lead@Client.ORG> bounced: user unknown",
        );

        let record = BounceClassifier::new().classify(&msg).unwrap();
        assert_eq!(record.original_recipient, "big.lead@client.org");
    }
}
