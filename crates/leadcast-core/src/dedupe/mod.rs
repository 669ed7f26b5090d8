//! Duplicate send detection.
//!
//! The last line of defense before the Mailer: decides whether a lead has
//! already been contacted. Polarity is fail-closed everywhere: an unknown
//! address or an unreadable store reads as "already sent", because a missed
//! send is recoverable and a duplicate send is not.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::{Lead, LeadStatus, RecordStore, normalize_email};

/// How long a cached lead lookup stays fresh.
///
/// Deliberately short: queued updates for the same lead can land while an
/// entry is cached, and the window bounds how stale a decision can be.
const CACHE_TTL_MINUTES: i64 = 5;

/// Outcome of a duplicate check.
#[derive(Debug, Clone)]
pub struct SendCheck {
    /// True when the lead must not be mailed.
    pub already_sent: bool,
    /// Which indicator decided, for the skip log.
    pub reason: String,
}

impl SendCheck {
    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            already_sent: true,
            reason: reason.into(),
        }
    }

    fn clear() -> Self {
        Self {
            already_sent: false,
            reason: "no send indicators".into(),
        }
    }
}

struct CachedLookup {
    lead: Option<Lead>,
    fetched_at: DateTime<Utc>,
}

/// Decides whether a lead has already been emailed.
pub struct DuplicateDetector {
    store: Arc<dyn RecordStore>,
    cache: Mutex<HashMap<String, CachedLookup>>,
    ttl: Duration,
}

impl DuplicateDetector {
    /// Creates a detector over the given record store.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::minutes(CACHE_TTL_MINUTES),
        }
    }

    /// Creates a detector with a custom cache TTL (for tests).
    #[must_use]
    pub fn with_ttl(store: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Checks whether the address has already been contacted.
    ///
    /// Indicators are evaluated in priority order; the first one present
    /// and true wins. Store read failures fail closed.
    pub async fn is_already_sent(&self, email: &str) -> SendCheck {
        let key = normalize_email(email);

        let lead = match self.lookup(&key).await {
            Ok(lead) => lead,
            Err(e) => {
                warn!(email = %key, error = %e, "lead lookup failed, failing closed");
                return SendCheck::blocked("record store unavailable");
            }
        };

        let Some(lead) = lead else {
            // Never send to an address the source of truth does not know.
            return SendCheck::blocked("lead not found in store");
        };

        Self::evaluate(&lead)
    }

    /// Forgets a cached lookup, forcing the next check to re-read.
    pub async fn invalidate(&self, email: &str) {
        self.cache.lock().await.remove(&normalize_email(email));
    }

    fn evaluate(lead: &Lead) -> SendCheck {
        if matches!(
            lead.status,
            LeadStatus::Sent | LeadStatus::Read | LeadStatus::Replied | LeadStatus::Clicked
        ) {
            return SendCheck::blocked(format!("status is {}", lead.status));
        }

        if let Some(date) = lead.last_email_date {
            return SendCheck::blocked(format!("last email date set ({date})"));
        }

        if lead.email_count > 0 {
            return SendCheck::blocked(format!("email count is {}", lead.email_count));
        }

        if let Some(template) = &lead.template_used
            && !template.is_empty()
            && template != "None"
        {
            return SendCheck::blocked(format!("template already used ({template})"));
        }

        SendCheck::clear()
    }

    async fn lookup(&self, key: &str) -> crate::Result<Option<Lead>> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(key)
                && Utc::now() - entry.fetched_at < self.ttl
            {
                debug!(email = %key, "lead lookup served from cache");
                return Ok(entry.lead.clone());
            }
        }

        let lead = self.store.find_by_email(key).await?;
        self.cache.lock().await.insert(
            key.to_string(),
            CachedLookup {
                lead: lead.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(lead)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory store stub with a call counter and a failure switch.
    struct StubStore {
        leads: HashMap<String, Lead>,
        reads: AtomicU32,
        fail: bool,
    }

    impl StubStore {
        fn with_lead(lead: Lead) -> Self {
            let mut leads = HashMap::new();
            leads.insert(lead.email.clone(), lead);
            Self {
                leads,
                reads: AtomicU32::new(0),
                fail: false,
            }
        }

        fn empty() -> Self {
            Self {
                leads: HashMap::new(),
                reads: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                leads: HashMap::new(),
                reads: AtomicU32::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl RecordStore for StubStore {
        async fn find_all(&self) -> crate::Result<Vec<Lead>> {
            Ok(self.leads.values().cloned().collect())
        }

        async fn find_by_email(&self, email: &str) -> crate::Result<Option<Lead>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Store("read failed".into()));
            }
            Ok(self.leads.get(&normalize_email(email)).cloned())
        }

        async fn patch(
            &self,
            _email: &str,
            _fields: &HashMap<String, Value>,
        ) -> crate::Result<bool> {
            Ok(true)
        }
    }

    fn fresh_lead() -> Lead {
        Lead::new("lead@example.com")
    }

    #[tokio::test]
    async fn pristine_lead_is_safe_to_send() {
        let detector = DuplicateDetector::new(Arc::new(StubStore::with_lead(fresh_lead())));
        let check = detector.is_already_sent("lead@example.com").await;
        assert!(!check.already_sent);
    }

    #[tokio::test]
    async fn sent_status_blocks() {
        let mut lead = fresh_lead();
        lead.status = LeadStatus::Sent;
        let detector = DuplicateDetector::new(Arc::new(StubStore::with_lead(lead)));
        let check = detector.is_already_sent("lead@example.com").await;
        assert!(check.already_sent);
        assert!(check.reason.contains("status"));
    }

    #[tokio::test]
    async fn last_email_date_blocks() {
        let mut lead = fresh_lead();
        lead.last_email_date = Some("2024-01-01T00:00:00Z".parse().unwrap());
        let detector = DuplicateDetector::new(Arc::new(StubStore::with_lead(lead)));
        assert!(detector.is_already_sent("lead@example.com").await.already_sent);
    }

    #[tokio::test]
    async fn email_count_blocks() {
        let mut lead = fresh_lead();
        lead.email_count = 1;
        let detector = DuplicateDetector::new(Arc::new(StubStore::with_lead(lead)));
        assert!(detector.is_already_sent("lead@example.com").await.already_sent);
    }

    #[tokio::test]
    async fn template_used_blocks_unless_none() {
        let mut lead = fresh_lead();
        lead.template_used = Some("intro-v1".into());
        let detector = DuplicateDetector::new(Arc::new(StubStore::with_lead(lead)));
        assert!(detector.is_already_sent("lead@example.com").await.already_sent);

        let mut lead = fresh_lead();
        lead.template_used = Some("None".into());
        let detector = DuplicateDetector::new(Arc::new(StubStore::with_lead(lead)));
        assert!(!detector.is_already_sent("lead@example.com").await.already_sent);
    }

    #[tokio::test]
    async fn status_wins_over_later_indicators() {
        // Replied status is reported even though email_count would also match.
        let mut lead = fresh_lead();
        lead.status = LeadStatus::Replied;
        lead.email_count = 3;
        let detector = DuplicateDetector::new(Arc::new(StubStore::with_lead(lead)));
        let check = detector.is_already_sent("lead@example.com").await;
        assert!(check.already_sent);
        assert!(check.reason.contains("Replied"));
    }

    #[tokio::test]
    async fn unknown_lead_fails_closed() {
        let detector = DuplicateDetector::new(Arc::new(StubStore::empty()));
        let check = detector.is_already_sent("stranger@example.com").await;
        assert!(check.already_sent);
        assert!(check.reason.contains("not found"));
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let detector = DuplicateDetector::new(Arc::new(StubStore::failing()));
        let check = detector.is_already_sent("lead@example.com").await;
        assert!(check.already_sent);
        assert!(check.reason.contains("unavailable"));
    }

    #[tokio::test]
    async fn lookups_are_cached() {
        let store = Arc::new(StubStore::with_lead(fresh_lead()));
        let detector = DuplicateDetector::new(Arc::clone(&store) as Arc<dyn RecordStore>);

        detector.is_already_sent("lead@example.com").await;
        detector.is_already_sent("Lead@Example.com ").await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_cache_entry_is_refetched() {
        let store = Arc::new(StubStore::with_lead(fresh_lead()));
        let detector =
            DuplicateDetector::with_ttl(Arc::clone(&store) as Arc<dyn RecordStore>, Duration::zero());

        detector.is_already_sent("lead@example.com").await;
        detector.is_already_sent("lead@example.com").await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_drops_cache_entry() {
        let store = Arc::new(StubStore::with_lead(fresh_lead()));
        let detector = DuplicateDetector::new(Arc::clone(&store) as Arc<dyn RecordStore>);

        detector.is_already_sent("lead@example.com").await;
        detector.invalidate("lead@example.com").await;
        detector.is_already_sent("lead@example.com").await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }
}
