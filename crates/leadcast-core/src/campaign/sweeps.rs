//! Reply and bounce sweeps over recent inbound mail.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bounce::{BounceClassifier, BounceType};
use crate::queue::{PendingUpdate, UpdateQueue};
use crate::service::Mailbox;
use crate::store::{LeadStatus, RecordStore, normalize_email};
use crate::Result;

/// Tally of one sweep run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepOutcome {
    /// Inbound messages examined.
    pub scanned: usize,
    /// Messages that matched a known lead.
    pub matched: usize,
    /// Lead updates applied successfully.
    pub updated: usize,
    /// Per-message failures (lookup or patch), isolated from the rest.
    pub errors: usize,
}

/// Scans recent inbound mail for replies from known leads.
///
/// An inbound message whose sender matches a known, non-terminal lead and
/// which does not classify as a bounce marks the lead Replied. Terminal
/// statuses are monotonic and never downgraded.
///
/// # Errors
///
/// Returns an error when the inbox itself cannot be listed; per-message
/// failures are counted and swept past.
pub async fn reply_sweep(
    mailbox: &dyn Mailbox,
    store: &Arc<dyn RecordStore>,
    queue: &UpdateQueue,
    classifier: &BounceClassifier,
    since: DateTime<Utc>,
) -> Result<SweepOutcome> {
    let messages = mailbox.recent_messages(since).await?;
    let mut outcome = SweepOutcome {
        scanned: messages.len(),
        ..SweepOutcome::default()
    };
    let mut pending: Vec<PendingUpdate> = Vec::new();

    for message in &messages {
        // Bounce notifications are the bounce sweep's business.
        if classifier.classify(message).is_some() {
            continue;
        }

        let sender = normalize_email(&message.from);
        let lead = match store.find_by_email(&sender).await {
            Ok(lead) => lead,
            Err(e) => {
                warn!(sender = %sender, error = %e, "reply sweep lookup failed");
                outcome.errors += 1;
                continue;
            }
        };

        let Some(lead) = lead else {
            continue;
        };
        if lead.status.is_terminal() {
            debug!(sender = %sender, status = %lead.status, "lead already terminal, leaving as-is");
            continue;
        }

        outcome.matched += 1;
        debug!(sender = %sender, "reply detected");
        pending.push(
            enqueue_status_patch(store, queue, &sender, LeadStatus::Replied, "mark replied").await,
        );
    }

    settle(pending, &mut outcome).await;
    info!(
        scanned = outcome.scanned,
        replies = outcome.matched,
        updated = outcome.updated,
        "reply sweep finished"
    );
    Ok(outcome)
}

/// Scans recent inbound mail for delivery failures.
///
/// Hard and Soft bounces mark the original recipient Bounced; Temporary
/// deferrals only annotate the bounce fields, since the provider may still
/// deliver.
///
/// # Errors
///
/// Returns an error when the inbox itself cannot be listed; per-message
/// failures are counted and swept past.
pub async fn bounce_sweep(
    mailbox: &dyn Mailbox,
    store: &Arc<dyn RecordStore>,
    queue: &UpdateQueue,
    classifier: &BounceClassifier,
    since: DateTime<Utc>,
) -> Result<SweepOutcome> {
    let messages = mailbox.recent_messages(since).await?;
    let mut outcome = SweepOutcome {
        scanned: messages.len(),
        ..SweepOutcome::default()
    };
    let mut pending: Vec<PendingUpdate> = Vec::new();

    for message in &messages {
        let Some(record) = classifier.classify(message) else {
            continue;
        };

        let recipient = record.original_recipient.clone();
        let lead = match store.find_by_email(&recipient).await {
            Ok(lead) => lead,
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "bounce sweep lookup failed");
                outcome.errors += 1;
                continue;
            }
        };

        let Some(lead) = lead else {
            debug!(recipient = %recipient, "bounce for unknown address, ignoring");
            continue;
        };
        if lead.status.is_terminal() {
            continue;
        }

        outcome.matched += 1;
        info!(
            recipient = %recipient,
            bounce_type = %record.bounce_type,
            reason = %record.bounce_reason,
            "bounce detected"
        );

        let mut fields = HashMap::new();
        fields.insert(
            "bounceType".to_string(),
            Value::String(record.bounce_type.to_string()),
        );
        fields.insert(
            "bounceReason".to_string(),
            Value::String(record.bounce_reason.clone()),
        );
        fields.insert(
            "bounceDate".to_string(),
            Value::String(record.bounce_date.to_rfc3339()),
        );
        if matches!(record.bounce_type, BounceType::Hard | BounceType::Soft) {
            fields.insert(
                "status".to_string(),
                Value::String(LeadStatus::Bounced.to_string()),
            );
        }

        pending.push(enqueue_fields_patch(store, queue, &recipient, fields, "mark bounced").await);
    }

    settle(pending, &mut outcome).await;
    info!(
        scanned = outcome.scanned,
        bounces = outcome.matched,
        updated = outcome.updated,
        "bounce sweep finished"
    );
    Ok(outcome)
}

async fn enqueue_status_patch(
    store: &Arc<dyn RecordStore>,
    queue: &UpdateQueue,
    email: &str,
    status: LeadStatus,
    context: &str,
) -> PendingUpdate {
    let mut fields = HashMap::new();
    fields.insert("status".to_string(), Value::String(status.to_string()));
    enqueue_fields_patch(store, queue, email, fields, context).await
}

async fn enqueue_fields_patch(
    store: &Arc<dyn RecordStore>,
    queue: &UpdateQueue,
    email: &str,
    fields: HashMap<String, Value>,
    context: &str,
) -> PendingUpdate {
    let store = Arc::clone(store);
    let email_owned = email.to_string();

    queue
        .enqueue(email, context, move || {
            let store = Arc::clone(&store);
            let email = email_owned.clone();
            let fields = fields.clone();
            async move { store.patch(&email, &fields).await.map(|_| ()) }
        })
        .await
}

async fn settle(pending: Vec<PendingUpdate>, outcome: &mut SweepOutcome) {
    for update in pending {
        match update.wait().await {
            Ok(()) => outcome.updated += 1,
            Err(_) => outcome.errors += 1,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::queue::RetryPolicy;
    use crate::service::InboundMessage;
    use crate::store::Lead;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct MemoryStore {
        leads: Mutex<HashMap<String, Lead>>,
    }

    impl MemoryStore {
        fn with_leads(leads: Vec<Lead>) -> Self {
            Self {
                leads: Mutex::new(leads.into_iter().map(|l| (l.email.clone(), l)).collect()),
            }
        }

        async fn lead(&self, email: &str) -> Option<Lead> {
            self.leads.lock().await.get(&normalize_email(email)).cloned()
        }
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn find_all(&self) -> Result<Vec<Lead>> {
            Ok(self.leads.lock().await.values().cloned().collect())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<Lead>> {
            Ok(self.leads.lock().await.get(&normalize_email(email)).cloned())
        }

        async fn patch(&self, email: &str, fields: &HashMap<String, Value>) -> Result<bool> {
            let mut leads = self.leads.lock().await;
            let Some(lead) = leads.get_mut(&normalize_email(email)) else {
                return Ok(false);
            };
            if let Some(Value::String(status)) = fields.get("status") {
                lead.status = LeadStatus::parse(status);
            }
            Ok(true)
        }
    }

    struct StubMailbox {
        messages: Vec<InboundMessage>,
    }

    #[async_trait]
    impl Mailbox for StubMailbox {
        async fn recent_messages(&self, _since: DateTime<Utc>) -> Result<Vec<InboundMessage>> {
            Ok(self.messages.clone())
        }
    }

    fn message(from: &str, subject: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: format!("msg-{from}"),
            from: from.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
        }
    }

    fn fast_queue() -> UpdateQueue {
        UpdateQueue::with_policy(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            Duration::from_millis(1),
        )
    }

    fn lead_with_status(email: &str, status: LeadStatus) -> Lead {
        let mut lead = Lead::new(email);
        lead.status = status;
        lead
    }

    #[tokio::test]
    async fn reply_from_known_lead_marks_replied() {
        let store = Arc::new(MemoryStore::with_leads(vec![lead_with_status(
            "jane@client.org",
            LeadStatus::Sent,
        )]));
        let mailbox = StubMailbox {
            messages: vec![message("Jane@Client.ORG", "Re: Intro", "Sounds interesting!")],
        };
        let queue = fast_queue();
        let store_dyn: Arc<dyn RecordStore> = Arc::clone(&store) as Arc<dyn RecordStore>;

        let outcome = reply_sweep(
            &mailbox,
            &store_dyn,
            &queue,
            &BounceClassifier::new(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(
            store.lead("jane@client.org").await.unwrap().status,
            LeadStatus::Replied
        );
    }

    #[tokio::test]
    async fn reply_sweep_ignores_bounces_and_strangers() {
        let store = Arc::new(MemoryStore::with_leads(vec![lead_with_status(
            "jane@client.org",
            LeadStatus::Sent,
        )]));
        let mailbox = StubMailbox {
            messages: vec![
                message("stranger@elsewhere.net", "Hello", "Unrelated mail"),
                message(
                    "mailer-daemon@mx.example.net",
                    "Undelivered Mail Returned to Sender",
                    "Your message to <jane@client.org> bounced: user unknown",
                ),
            ],
        };
        let queue = fast_queue();
        let store_dyn: Arc<dyn RecordStore> = Arc::clone(&store) as Arc<dyn RecordStore>;

        let outcome = reply_sweep(
            &mailbox,
            &store_dyn,
            &queue,
            &BounceClassifier::new(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.scanned, 2);
        assert_eq!(outcome.matched, 0);
        // The bounce is left for the bounce sweep; status unchanged here.
        assert_eq!(
            store.lead("jane@client.org").await.unwrap().status,
            LeadStatus::Sent
        );
    }

    #[tokio::test]
    async fn terminal_lead_is_never_downgraded_by_reply() {
        let store = Arc::new(MemoryStore::with_leads(vec![lead_with_status(
            "jane@client.org",
            LeadStatus::Unsubscribed,
        )]));
        let mailbox = StubMailbox {
            messages: vec![message("jane@client.org", "Re: Intro", "Actually...")],
        };
        let queue = fast_queue();
        let store_dyn: Arc<dyn RecordStore> = Arc::clone(&store) as Arc<dyn RecordStore>;

        let outcome = reply_sweep(
            &mailbox,
            &store_dyn,
            &queue,
            &BounceClassifier::new(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.matched, 0);
        assert_eq!(
            store.lead("jane@client.org").await.unwrap().status,
            LeadStatus::Unsubscribed
        );
    }

    #[tokio::test]
    async fn hard_bounce_marks_lead_bounced() {
        let store = Arc::new(MemoryStore::with_leads(vec![lead_with_status(
            "jane@client.org",
            LeadStatus::Sent,
        )]));
        let mailbox = StubMailbox {
            messages: vec![message(
                "mailer-daemon@mx.example.net",
                "Undelivered Mail Returned to Sender",
                "Your message to <jane@client.org> failed.\n550 mailbox unavailable",
            )],
        };
        let queue = fast_queue();
        let store_dyn: Arc<dyn RecordStore> = Arc::clone(&store) as Arc<dyn RecordStore>;

        let outcome = bounce_sweep(
            &mailbox,
            &store_dyn,
            &queue,
            &BounceClassifier::new(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(
            store.lead("jane@client.org").await.unwrap().status,
            LeadStatus::Bounced
        );
    }

    #[tokio::test]
    async fn temporary_bounce_leaves_status_alone() {
        let store = Arc::new(MemoryStore::with_leads(vec![lead_with_status(
            "jane@client.org",
            LeadStatus::Sent,
        )]));
        let mailbox = StubMailbox {
            messages: vec![message(
                "mailer-daemon@mx.example.net",
                "Mail delivery failed",
                "Message to jane@client.org was greylisted, will retry",
            )],
        };
        let queue = fast_queue();
        let store_dyn: Arc<dyn RecordStore> = Arc::clone(&store) as Arc<dyn RecordStore>;

        let outcome = bounce_sweep(
            &mailbox,
            &store_dyn,
            &queue,
            &BounceClassifier::new(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.matched, 1);
        assert_eq!(
            store.lead("jane@client.org").await.unwrap().status,
            LeadStatus::Sent
        );
    }

    #[tokio::test]
    async fn bounce_for_unknown_address_is_ignored() {
        let mailbox = StubMailbox {
            messages: vec![message(
                "mailer-daemon@mx.example.net",
                "Undeliverable",
                "Your message to <stranger@nowhere.net> failed: user unknown",
            )],
        };
        let queue = fast_queue();
        let store_dyn: Arc<dyn RecordStore> = Arc::new(MemoryStore::with_leads(vec![]));

        let outcome = bounce_sweep(
            &mailbox,
            &store_dyn,
            &queue,
            &BounceClassifier::new(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.scanned, 1);
        assert_eq!(outcome.matched, 0);
        assert_eq!(outcome.updated, 0);
    }
}
