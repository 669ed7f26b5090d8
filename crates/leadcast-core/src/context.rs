//! Process-wide application context.
//!
//! One [`AppContext`] is constructed at startup and passed explicitly to
//! jobs and route handlers; there are no global singletons. It owns the
//! single-instance pieces (session manager, update queue, send counter)
//! and hands out per-session service bundles bound to that session's
//! credentials.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Url;
use tokio::sync::Mutex;

use crate::bounce::BounceClassifier;
use crate::campaign::{
    Campaign, CampaignOutcome, CampaignRunner, SweepOutcome, bounce_sweep, reply_sweep,
};
use crate::dedupe::DuplicateDetector;
use crate::pacing::{DelayPolicy, SendCounter};
use crate::queue::UpdateQueue;
use crate::service::{Mailbox, Mailer, RestMailbox, RestMailer};
use crate::session::{SessionId, SessionManager};
use crate::store::{RecordStore, SheetStore};
use crate::Result;

/// Base URLs of the remote collaborators.
#[derive(Debug, Clone)]
pub struct RemoteEndpoints {
    /// Lead sheet rows API.
    pub sheet_base_url: Url,
    /// Mail provider send/list API.
    pub mail_base_url: Url,
}

/// REST collaborators bound to one session's credentials.
pub struct SessionServices {
    /// Lead sheet adapter.
    pub store: Arc<dyn RecordStore>,
    /// Duplicate detector over that adapter (cache survives across sweeps).
    pub detector: Arc<DuplicateDetector>,
    /// Outbound mailer.
    pub mailer: Arc<dyn Mailer>,
    /// Inbox reader.
    pub mailbox: Arc<dyn Mailbox>,
}

/// Everything the jobs and operator endpoints need, constructed once.
pub struct AppContext {
    /// Session and token lifecycle manager.
    pub sessions: Arc<SessionManager>,
    /// The per-lead serialized update queue.
    pub queue: Arc<UpdateQueue>,
    /// Bounce classifier (stateless, shared).
    pub classifier: Arc<BounceClassifier>,
    /// Pacing policy for campaign sends.
    pub pacing: DelayPolicy,
    /// Process-lifetime send counter.
    pub counter: Arc<SendCounter>,
    /// Maximum leads per campaign batch.
    pub batch_size: usize,
    endpoints: RemoteEndpoints,
    services: Mutex<HashMap<SessionId, Arc<SessionServices>>>,
}

impl AppContext {
    /// Builds the context.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        endpoints: RemoteEndpoints,
        pacing: DelayPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            sessions,
            queue: Arc::new(UpdateQueue::new()),
            classifier: Arc::new(BounceClassifier::new()),
            pacing,
            counter: Arc::new(SendCounter::new()),
            batch_size,
            endpoints,
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Service bundle for one session, created on first use and cached so
    /// the duplicate detector's lookup cache survives across sweeps.
    pub async fn services_for(&self, id: &SessionId) -> Arc<SessionServices> {
        let mut services = self.services.lock().await;
        if let Some(bundle) = services.get(id) {
            return Arc::clone(bundle);
        }

        let store: Arc<dyn RecordStore> = Arc::new(SheetStore::new(
            self.endpoints.sheet_base_url.clone(),
            Arc::clone(&self.sessions),
            id.clone(),
        ));
        let bundle = Arc::new(SessionServices {
            detector: Arc::new(DuplicateDetector::new(Arc::clone(&store))),
            store,
            mailer: Arc::new(RestMailer::new(
                self.endpoints.mail_base_url.clone(),
                Arc::clone(&self.sessions),
                id.clone(),
            )),
            mailbox: Arc::new(RestMailbox::new(
                self.endpoints.mail_base_url.clone(),
                Arc::clone(&self.sessions),
                id.clone(),
            )),
        });

        services.insert(id.clone(), Arc::clone(&bundle));
        bundle
    }

    /// Drops cached service bundles for sessions that no longer exist.
    pub async fn prune_services(&self, active: &[SessionId]) {
        self.services
            .lock()
            .await
            .retain(|id, _| active.contains(id));
    }

    /// Runs one campaign batch under the given session.
    ///
    /// # Errors
    ///
    /// Propagates sheet read failures and credential rejections.
    pub async fn run_campaign(
        &self,
        session: &SessionId,
        campaign: &Campaign,
    ) -> Result<CampaignOutcome> {
        let services = self.services_for(session).await;
        let runner = CampaignRunner::new(
            Arc::clone(&services.store),
            Arc::clone(&services.detector),
            Arc::clone(&services.mailer),
            Arc::clone(&self.queue),
            self.pacing,
            Arc::clone(&self.counter),
            self.batch_size,
        );
        runner.run_batch(campaign).await
    }

    /// Runs the reply sweep for one session.
    ///
    /// # Errors
    ///
    /// Propagates inbox listing failures.
    pub async fn run_reply_sweep(
        &self,
        session: &SessionId,
        since: DateTime<Utc>,
    ) -> Result<SweepOutcome> {
        let services = self.services_for(session).await;
        reply_sweep(
            services.mailbox.as_ref(),
            &services.store,
            &self.queue,
            &self.classifier,
            since,
        )
        .await
    }

    /// Runs the bounce sweep for one session.
    ///
    /// # Errors
    ///
    /// Propagates inbox listing failures.
    pub async fn run_bounce_sweep(
        &self,
        session: &SessionId,
        since: DateTime<Utc>,
    ) -> Result<SweepOutcome> {
        let services = self.services_for(session).await;
        bounce_sweep(
            services.mailbox.as_ref(),
            &services.store,
            &self.queue,
            &self.classifier,
            since,
        )
        .await
    }
}
