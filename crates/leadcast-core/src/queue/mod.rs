//! Per-lead serialized update queue.
//!
//! The remote sheet has no transactions, so two concurrent writers to the
//! same row would silently lose updates. Every mutation goes through this
//! queue: one lane per lead, strict FIFO within a lane, full concurrency
//! across lanes.

mod retry;
mod task;

pub use retry::{RetryPolicy, execute_with_retry};
pub use task::{PendingUpdate, UpdateQueue};
