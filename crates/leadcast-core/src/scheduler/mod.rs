//! Background job scheduling.
//!
//! One generic periodic runner keyed by job name, instead of a timer setup
//! copy-pasted per job. Each job is independent: a run may overrun its
//! interval, in which case the next tick of that job (and only that job)
//! is skipped; different jobs never serialize against each other.

mod jobs;

pub use jobs::spawn_background_jobs;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Result;

/// Snapshot of one job's state, for the operator status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    /// Job name.
    pub name: String,
    /// Interval between ticks, in seconds.
    pub interval_secs: u64,
    /// Whether a run is in flight right now.
    pub running: bool,
    /// Completed runs.
    pub runs: u64,
    /// Ticks skipped because the previous run was still going.
    pub skipped: u64,
    /// When the last run started.
    pub last_started: Option<DateTime<Utc>>,
    /// Error from the most recent run, if it failed.
    pub last_error: Option<String>,
}

/// Snapshot of all scheduled jobs.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Per-job state.
    pub jobs: Vec<JobStatus>,
}

struct JobState {
    name: String,
    interval: Duration,
    running: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
    last_started: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl JobState {
    fn snapshot(&self) -> JobStatus {
        JobStatus {
            name: self.name.clone(),
            interval_secs: self.interval.as_secs(),
            running: self.running.load(Ordering::SeqCst),
            runs: self.runs.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            last_started: *self.last_started.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Runs independent periodic jobs without collision.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<Vec<Arc<JobState>>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers and starts a periodic job.
    ///
    /// The first run happens one interval after registration. A tick that
    /// arrives while the previous run of this job is still in flight is
    /// counted as skipped, never queued.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let state = Arc::new(JobState {
            name: name.to_string(),
            interval,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            last_started: Mutex::new(None),
            last_error: Mutex::new(None),
        });

        self.jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Arc::clone(&state));

        let job = Arc::new(job);
        info!(job = %state.name, interval_secs = interval.as_secs(), "periodic job registered");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so the job
            // starts one interval after registration.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if state.running.swap(true, Ordering::SeqCst) {
                    state.skipped.fetch_add(1, Ordering::SeqCst);
                    debug!(job = %state.name, "previous run still in flight, skipping tick");
                    continue;
                }

                let state = Arc::clone(&state);
                let job = Arc::clone(&job);
                tokio::spawn(async move {
                    *state
                        .last_started
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Utc::now());

                    let outcome = job().await;

                    let mut last_error = state
                        .last_error
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    match outcome {
                        Ok(()) => *last_error = None,
                        Err(e) => {
                            warn!(job = %state.name, error = %e, "periodic job failed");
                            *last_error = Some(e.to_string());
                        }
                    }
                    drop(last_error);

                    state.runs.fetch_add(1, Ordering::SeqCst);
                    state.running.store(false, Ordering::SeqCst);
                });
            }
        });
    }

    /// Snapshots the state of every registered job.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|state| state.snapshot())
            .collect();
        SchedulerStatus { jobs }
    }
}
