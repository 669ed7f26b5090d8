//! The send pipeline and the periodic sweeps.
//!
//! A campaign batch walks sendable leads through duplicate detection,
//! pacing, the mailer, and finally the update queue. The reply and bounce
//! sweeps walk recent inbound mail the other way, turning replies and
//! delivery failures into queued lead updates.

mod runner;
mod sweeps;

pub use runner::{Campaign, CampaignOutcome, CampaignRunner};
pub use sweeps::{SweepOutcome, bounce_sweep, reply_sweep};
