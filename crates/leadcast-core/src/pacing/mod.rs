//! Send pacing.
//!
//! Providers flag accounts that blast mail at machine speed. Every send
//! (except the last of a batch) is preceded by a randomized delay, and
//! batches are separated by a longer break. Three modes exist: plain
//! random, progressive (later mails in a batch spread further apart), and
//! smart (time-of-day and daily volume aware).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Local, Timelike};
use rand::Rng;

/// Default lower bound between sends, in seconds.
const DEFAULT_MIN_SECS: u64 = 30;

/// Default upper bound between sends, in seconds.
const DEFAULT_MAX_SECS: u64 = 120;

/// Bounds for the pause between batches, in seconds.
const BATCH_BREAK_SECS: (u64, u64) = (120, 300);

/// How inter-send delays are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacingMode {
    /// Uniform sample between the bounds.
    #[default]
    Random,
    /// Bounds grow with batch progress; later mails spread further apart.
    Progressive,
    /// Bounds scale with time of day and volume already sent today.
    Smart,
}

/// Inputs for one delay decision.
///
/// The clock hour is captured at call time and passed explicitly so tests
/// can pin it.
#[derive(Debug, Clone, Copy)]
pub struct PacingContext {
    /// Position of the message in the current batch (0-based).
    pub index: usize,
    /// Batch size.
    pub total: usize,
    /// Messages already sent today, process-lifetime.
    pub sent_today: u64,
    /// Local clock hour (0-23).
    pub hour: u32,
}

impl PacingContext {
    /// Captures a context from the wall clock and the send counter.
    #[must_use]
    pub fn capture(index: usize, total: usize, counter: &SendCounter) -> Self {
        Self {
            index,
            total,
            sent_today: counter.sent_today(),
            hour: Local::now().hour(),
        }
    }
}

/// Computes inter-message delays.
#[derive(Debug, Clone, Copy)]
pub struct DelayPolicy {
    mode: PacingMode,
    min_secs: u64,
    max_secs: u64,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::random()
    }
}

impl DelayPolicy {
    /// Plain random pacing with default bounds.
    #[must_use]
    pub const fn random() -> Self {
        Self {
            mode: PacingMode::Random,
            min_secs: DEFAULT_MIN_SECS,
            max_secs: DEFAULT_MAX_SECS,
        }
    }

    /// Progressive pacing for long homogeneous batches.
    #[must_use]
    pub const fn progressive() -> Self {
        Self {
            mode: PacingMode::Progressive,
            min_secs: DEFAULT_MIN_SECS,
            max_secs: DEFAULT_MAX_SECS,
        }
    }

    /// Time-and-volume-aware pacing.
    #[must_use]
    pub const fn smart() -> Self {
        Self {
            mode: PacingMode::Smart,
            min_secs: DEFAULT_MIN_SECS,
            max_secs: DEFAULT_MAX_SECS,
        }
    }

    /// Overrides the base bounds (seconds).
    #[must_use]
    pub const fn with_bounds(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.min_secs = min_secs;
        self.max_secs = max_secs;
        self
    }

    /// The pacing mode.
    #[must_use]
    pub const fn mode(&self) -> PacingMode {
        self.mode
    }

    /// Computes the delay to apply before the next send.
    ///
    /// Applied before every send except after the final item in a batch.
    #[must_use]
    pub fn next_delay(&self, ctx: &PacingContext) -> Duration {
        let multiplier = self.multiplier(ctx);
        let (min_ms, max_ms) = self.scaled_bounds_ms(multiplier);
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// The pause inserted between batches (not individual messages).
    #[must_use]
    pub fn batch_break_delay() -> Duration {
        let (min, max) = BATCH_BREAK_SECS;
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }

    fn multiplier(&self, ctx: &PacingContext) -> f64 {
        match self.mode {
            PacingMode::Random => 1.0,
            PacingMode::Progressive => {
                if ctx.total == 0 {
                    1.0
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    {
                        1.0 + (ctx.index as f64 / ctx.total as f64) * 0.5
                    }
                }
            }
            PacingMode::Smart => {
                let time_of_day = match ctx.hour {
                    9..=16 => 0.8,
                    18..=20 => 1.2,
                    _ => 1.5,
                };
                let volume = match ctx.sent_today {
                    0..=50 => 1.0,
                    51..=100 => 1.2,
                    _ => 1.5,
                };
                time_of_day * volume
            }
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn scaled_bounds_ms(&self, multiplier: f64) -> (u64, u64) {
        let min_ms = (self.min_secs as f64 * 1000.0 * multiplier) as u64;
        let max_ms = (self.max_secs as f64 * 1000.0 * multiplier) as u64;
        (min_ms, max_ms.max(min_ms))
    }
}

/// Process-lifetime counter of sends performed today.
///
/// Not persisted across restarts; a restart starts the tally over, which
/// only ever makes the smart policy more conservative.
#[derive(Debug, Default)]
pub struct SendCounter {
    sent: AtomicU64,
}

impl SendCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
        }
    }

    /// Records one send.
    pub fn record_send(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages sent since process start.
    #[must_use]
    pub fn sent_today(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}
