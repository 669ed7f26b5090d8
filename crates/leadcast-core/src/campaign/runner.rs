//! Campaign batch execution.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dedupe::DuplicateDetector;
use crate::pacing::{DelayPolicy, PacingContext, SendCounter};
use crate::queue::{PendingUpdate, UpdateQueue};
use crate::service::{Mailer, OutgoingMessage};
use crate::store::{Lead, LeadStatus, RecordStore, lead_to_fields};
use crate::{Error, Result};

/// Message content for one campaign.
///
/// Template CRUD lives elsewhere; the runner only substitutes `{{name}}`,
/// `{{company}}`, and `{{email}}` placeholders into the stored content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign identifier, written back to the sheet.
    pub id: String,
    /// Template name, written back to the sheet.
    pub template_name: String,
    /// Subject line, with placeholders.
    pub subject: String,
    /// HTML body, with placeholders.
    pub html_body: String,
}

impl Campaign {
    /// Renders the campaign message for one lead.
    #[must_use]
    pub fn render(&self, lead: &Lead) -> OutgoingMessage {
        let name = lead.name.as_deref().unwrap_or("there");
        let company = lead.company.as_deref().unwrap_or("your team");

        let substitute = |text: &str| {
            text.replace("{{name}}", name)
                .replace("{{company}}", company)
                .replace("{{email}}", &lead.email)
        };

        OutgoingMessage::new(
            lead.email.clone(),
            substitute(&self.subject),
            substitute(&self.html_body),
        )
    }
}

/// Tally of one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignOutcome {
    /// Leads selected as sendable.
    pub selected: usize,
    /// Messages handed to the mailer successfully.
    pub sent: usize,
    /// Leads skipped by the duplicate detector.
    pub skipped_duplicates: usize,
    /// Sends that failed with a transient error.
    pub failed_sends: usize,
    /// Queued patches that failed after retries.
    pub failed_updates: usize,
}

/// Drives one campaign batch end to end.
pub struct CampaignRunner {
    store: Arc<dyn RecordStore>,
    detector: Arc<DuplicateDetector>,
    mailer: Arc<dyn Mailer>,
    queue: Arc<UpdateQueue>,
    pacing: DelayPolicy,
    counter: Arc<SendCounter>,
    batch_size: usize,
}

impl CampaignRunner {
    /// Creates a runner over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        detector: Arc<DuplicateDetector>,
        mailer: Arc<dyn Mailer>,
        queue: Arc<UpdateQueue>,
        pacing: DelayPolicy,
        counter: Arc<SendCounter>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            detector,
            mailer,
            queue,
            pacing,
            counter,
            batch_size,
        }
    }

    /// Runs one batch of the campaign.
    ///
    /// Selects sendable leads, guards each through the duplicate detector,
    /// paces the sends, and queues the resulting sheet updates. Auth
    /// failures abort the batch (the credential is stale for every
    /// remaining lead); transient send failures mark the one lead Failed
    /// and continue.
    ///
    /// # Errors
    ///
    /// Returns an error when the lead sheet cannot be read or when the
    /// mailer rejects the credential.
    pub async fn run_batch(&self, campaign: &Campaign) -> Result<CampaignOutcome> {
        let now = Utc::now();
        let leads: Vec<Lead> = self
            .store
            .find_all()
            .await?
            .into_iter()
            .filter(|lead| {
                lead.is_sendable(now)
                    && lead
                        .campaign_id
                        .as_ref()
                        .is_none_or(|id| id == &campaign.id)
            })
            .take(self.batch_size)
            .collect();

        let mut outcome = CampaignOutcome {
            selected: leads.len(),
            ..CampaignOutcome::default()
        };
        info!(campaign = %campaign.id, selected = leads.len(), "campaign batch starting");

        let total = leads.len();
        let mut pending_updates: Vec<PendingUpdate> = Vec::new();

        for (index, lead) in leads.iter().enumerate() {
            let check = self.detector.is_already_sent(&lead.email).await;
            if check.already_sent {
                debug!(email = %lead.email, reason = %check.reason, "duplicate guard skipped lead");
                outcome.skipped_duplicates += 1;
                continue;
            }

            let message = campaign.render(lead);
            match self.mailer.send(&message).await {
                Ok(()) => {
                    self.counter.record_send();
                    outcome.sent += 1;
                    pending_updates.push(self.enqueue_sent_patch(lead, campaign).await);
                }
                Err(e) if e.is_auth() => {
                    warn!(campaign = %campaign.id, error = %e, "credential rejected, aborting batch");
                    Self::settle_updates(pending_updates, &mut outcome).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(email = %lead.email, error = %e, "send failed, marking lead Failed");
                    outcome.failed_sends += 1;
                    pending_updates.push(self.enqueue_failed_patch(lead).await);
                }
            }

            self.detector.invalidate(&lead.email).await;

            // Pace every send except after the final item of the batch.
            if index + 1 < total {
                let ctx = PacingContext::capture(index, total, &self.counter);
                let delay = self.pacing.next_delay(&ctx);
                debug!(delay = ?delay, "pacing before next send");
                tokio::time::sleep(delay).await;
            }
        }

        Self::settle_updates(pending_updates, &mut outcome).await;
        info!(
            campaign = %campaign.id,
            sent = outcome.sent,
            skipped = outcome.skipped_duplicates,
            failed = outcome.failed_sends,
            "campaign batch finished"
        );
        Ok(outcome)
    }

    async fn settle_updates(pending: Vec<PendingUpdate>, outcome: &mut CampaignOutcome) {
        for update in pending {
            if update.wait().await.is_err() {
                outcome.failed_updates += 1;
            }
        }
    }

    async fn enqueue_sent_patch(&self, lead: &Lead, campaign: &Campaign) -> PendingUpdate {
        let mut updated = lead.clone();
        updated.status = LeadStatus::Sent;
        updated.last_email_date = Some(Utc::now());
        updated.email_count = lead.email_count + 1;
        updated.template_used = Some(campaign.template_name.clone());
        updated.campaign_id = Some(campaign.id.clone());

        self.enqueue_patch(updated, "mark sent").await
    }

    async fn enqueue_failed_patch(&self, lead: &Lead) -> PendingUpdate {
        let mut updated = lead.clone();
        updated.status = LeadStatus::Failed;

        self.enqueue_patch(updated, "mark failed").await
    }

    async fn enqueue_patch(&self, updated: Lead, context: &str) -> PendingUpdate {
        let store = Arc::clone(&self.store);
        let key = updated.email.clone();
        let email = updated.email.clone();
        let fields = lead_to_fields(&updated);

        self.queue
            .enqueue(&key, context, move || {
                let store = Arc::clone(&store);
                let email = email.clone();
                let fields = fields.clone();
                async move { store.patch(&email, &fields).await.map(|_| ()) }
            })
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::queue::RetryPolicy;
    use crate::store::normalize_email;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Record store stub that applies patches to an in-memory map.
    struct MemoryStore {
        leads: Mutex<HashMap<String, Lead>>,
    }

    impl MemoryStore {
        fn with_leads(leads: Vec<Lead>) -> Self {
            Self {
                leads: Mutex::new(leads.into_iter().map(|l| (l.email.clone(), l)).collect()),
            }
        }

        async fn status_of(&self, email: &str) -> Option<String> {
            self.leads
                .lock()
                .await
                .get(&normalize_email(email))
                .map(|l| l.status.to_string())
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
                lead.status = crate::store::LeadStatus::parse(status);
            }
            if let Some(Value::Number(count)) = fields.get("emailCount") {
                lead.email_count = u32::try_from(count.as_i64().unwrap_or(0)).unwrap_or(0);
            }
            if let Some(Value::String(date)) = fields.get("lastEmailDate") {
                lead.last_email_date = date.parse().ok();
            }
            if let Some(Value::String(template)) = fields.get("templateUsed") {
                lead.template_used = Some(template.clone());
            }
            Ok(true)
        }
    }

    /// Mailer stub recording recipients, optionally failing per address.
    #[derive(Default)]
    struct StubMailer {
        sent: Mutex<Vec<String>>,
        fail_for: Option<String>,
        auth_fail: bool,
    }

    #[async_trait]
    impl Mailer for StubMailer {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            if self.auth_fail {
                return Err(Error::Unauthorized("401".into()));
            }
            if self.fail_for.as_deref() == Some(message.to.as_str()) {
                return Err(Error::Mailer("connection reset".into()));
            }
            self.sent.lock().await.push(message.to.clone());
            Ok(())
        }
    }

    fn campaign() -> Campaign {
        Campaign {
            id: "q1-launch".to_string(),
            template_name: "intro-v1".to_string(),
            subject: "Hello {{name}}".to_string(),
            html_body: "<p>Hi {{name}} at {{company}}</p>".to_string(),
        }
    }

    fn runner(store: Arc<MemoryStore>, mailer: Arc<StubMailer>) -> CampaignRunner {
        let queue = Arc::new(UpdateQueue::with_policy(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            Duration::from_millis(1),
        ));
        CampaignRunner::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::new(DuplicateDetector::new(
                Arc::clone(&store) as Arc<dyn RecordStore>
            )),
            mailer,
            queue,
            // Zero bounds keep tests instant while exercising the pacing path.
            DelayPolicy::random().with_bounds(0, 0),
            Arc::new(SendCounter::new()),
            50,
        )
    }

    #[test]
    fn render_substitutes_placeholders() {
        let mut lead = Lead::new("jane@client.org");
        lead.name = Some("Jane".to_string());
        lead.company = Some("Client Org".to_string());

        let message = campaign().render(&lead);
        assert_eq!(message.subject, "Hello Jane");
        assert_eq!(message.html_body, "<p>Hi Jane at Client Org</p>");
        assert_eq!(message.to, "jane@client.org");
    }

    #[test]
    fn render_falls_back_for_missing_fields() {
        let message = campaign().render(&Lead::new("jane@client.org"));
        assert_eq!(message.subject, "Hello there");
    }

    #[tokio::test]
    async fn batch_sends_fresh_leads_and_patches_them() {
        let store = Arc::new(MemoryStore::with_leads(vec![
            Lead::new("a@client.org"),
            Lead::new("b@client.org"),
        ]));
        let mailer = Arc::new(StubMailer::default());
        let runner = runner(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = runner.run_batch(&campaign()).await.unwrap();

        assert_eq!(outcome.selected, 2);
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed_updates, 0);
        assert_eq!(mailer.sent.lock().await.len(), 2);
        assert_eq!(store.status_of("a@client.org").await.as_deref(), Some("Sent"));
        assert_eq!(store.status_of("b@client.org").await.as_deref(), Some("Sent"));
    }

    #[tokio::test]
    async fn already_sent_leads_are_skipped() {
        let mut sent = Lead::new("done@client.org");
        sent.status = LeadStatus::New;
        sent.email_count = 1;
        let store = Arc::new(MemoryStore::with_leads(vec![sent, Lead::new("new@client.org")]));
        let mailer = Arc::new(StubMailer::default());
        let runner = runner(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = runner.run_batch(&campaign()).await.unwrap();

        assert_eq!(outcome.skipped_duplicates, 1);
        assert_eq!(outcome.sent, 1);
        assert_eq!(*mailer.sent.lock().await, vec!["new@client.org".to_string()]);
    }

    #[tokio::test]
    async fn terminal_leads_are_never_selected() {
        let mut replied = Lead::new("replied@client.org");
        replied.status = LeadStatus::Replied;
        let store = Arc::new(MemoryStore::with_leads(vec![replied]));
        let mailer = Arc::new(StubMailer::default());
        let runner = runner(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = runner.run_batch(&campaign()).await.unwrap();
        assert_eq!(outcome.selected, 0);
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn transient_send_failure_marks_lead_failed_and_continues() {
        let store = Arc::new(MemoryStore::with_leads(vec![
            Lead::new("broken@client.org"),
            Lead::new("fine@client.org"),
        ]));
        let mailer = Arc::new(StubMailer {
            fail_for: Some("broken@client.org".to_string()),
            ..StubMailer::default()
        });
        let runner = runner(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = runner.run_batch(&campaign()).await.unwrap();

        assert_eq!(outcome.failed_sends, 1);
        assert_eq!(outcome.sent, 1);
        assert_eq!(
            store.status_of("broken@client.org").await.as_deref(),
            Some("Failed")
        );
        assert_eq!(store.status_of("fine@client.org").await.as_deref(), Some("Sent"));
    }

    #[tokio::test]
    async fn auth_failure_aborts_the_batch() {
        let store = Arc::new(MemoryStore::with_leads(vec![
            Lead::new("a@client.org"),
            Lead::new("b@client.org"),
        ]));
        let mailer = Arc::new(StubMailer {
            auth_fail: true,
            ..StubMailer::default()
        });
        let runner = runner(Arc::clone(&store), Arc::clone(&mailer));

        let err = runner.run_batch(&campaign()).await.unwrap_err();
        assert!(err.is_auth());
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn foreign_campaign_leads_are_left_alone() {
        let mut other = Lead::new("other@client.org");
        other.campaign_id = Some("different-campaign".to_string());
        let store = Arc::new(MemoryStore::with_leads(vec![other]));
        let mailer = Arc::new(StubMailer::default());
        let runner = runner(Arc::clone(&store), Arc::clone(&mailer));

        let outcome = runner.run_batch(&campaign()).await.unwrap();
        assert_eq!(outcome.selected, 0);
    }
}
