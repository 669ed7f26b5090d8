//! # leadcast-core
//!
//! Core automation logic for the `leadcast` outbound campaign service.
//!
//! This crate provides:
//! - Session and token lifecycle management for background jobs
//! - A REST record store adapter over the remote lead sheet
//! - A per-lead serialized update queue with bounded retry
//! - Duplicate detection and bounce classification
//! - Send pacing policies
//! - A background scheduler for periodic sweeps
//!
//! The remote sheet offers no transactions; correctness comes from the
//! update queue (one mutation at a time per lead) and from fail-closed
//! duplicate detection in front of every send.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod bounce;
pub mod campaign;
mod context;
pub mod dedupe;
mod error;
pub mod pacing;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod store;

pub use bounce::{BounceClassifier, BounceRecord, BounceType};
pub use campaign::{Campaign, CampaignOutcome, CampaignRunner, SweepOutcome};
pub use context::{AppContext, RemoteEndpoints, SessionServices};
pub use dedupe::{DuplicateDetector, SendCheck};
pub use error::{Error, Result};
pub use pacing::{DelayPolicy, PacingContext, PacingMode, SendCounter};
pub use queue::{PendingUpdate, RetryPolicy, UpdateQueue, execute_with_retry};
pub use scheduler::{JobStatus, Scheduler, SchedulerStatus, spawn_background_jobs};
pub use service::{InboundMessage, Mailbox, Mailer, OutgoingMessage, RestMailbox, RestMailer};
pub use session::{
    RefreshOutcome, RefreshSummary, Session, SessionId, SessionManager, SessionRepository,
    TokenRefresher, credentials,
};
pub use store::{Lead, LeadStatus, RecordStore, SheetStore, normalize_email};
