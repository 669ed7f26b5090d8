//! The standing background jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use super::Scheduler;
use crate::context::AppContext;
use crate::{Error, Result};

/// Reply detection interval.
const REPLY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Bounce detection interval.
const BOUNCE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Proactive token refresh interval.
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Session cleanup interval.
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Registers the four standing jobs on the scheduler.
///
/// Each job iterates all active sessions and isolates per-session
/// failures: one session's broken inbox or stale grant never blocks the
/// sweep for the others.
pub fn spawn_background_jobs(scheduler: &Scheduler, ctx: &Arc<AppContext>) {
    let reply_ctx = Arc::clone(ctx);
    scheduler.spawn_periodic("reply-detection", REPLY_INTERVAL, move || {
        let ctx = Arc::clone(&reply_ctx);
        async move { sweep_all_sessions(&ctx, "reply-detection", REPLY_INTERVAL, SweepKind::Reply).await }
    });

    let bounce_ctx = Arc::clone(ctx);
    scheduler.spawn_periodic("bounce-detection", BOUNCE_INTERVAL, move || {
        let ctx = Arc::clone(&bounce_ctx);
        async move { sweep_all_sessions(&ctx, "bounce-detection", BOUNCE_INTERVAL, SweepKind::Bounce).await }
    });

    let refresh_ctx = Arc::clone(ctx);
    scheduler.spawn_periodic("token-refresh", TOKEN_REFRESH_INTERVAL, move || {
        let ctx = Arc::clone(&refresh_ctx);
        async move {
            let summary = ctx.sessions.refresh_expiring_sessions().await;
            if summary.failed() > 0 {
                warn!(
                    failed = summary.failed(),
                    attempted = summary.attempted,
                    "some sessions failed to refresh"
                );
            }
            Ok(())
        }
    });

    let cleanup_ctx = Arc::clone(ctx);
    scheduler.spawn_periodic("session-cleanup", SESSION_CLEANUP_INTERVAL, move || {
        let ctx = Arc::clone(&cleanup_ctx);
        async move {
            let removed = ctx.sessions.cleanup_stale().await;
            let active = ctx.sessions.active_ids().await;
            ctx.prune_services(&active).await;
            if removed > 0 {
                info!(removed, "stale sessions cleaned up");
            }
            Ok(())
        }
    });
}

#[derive(Clone, Copy)]
enum SweepKind {
    Reply,
    Bounce,
}

/// Runs one sweep kind across every active session.
///
/// The lookback window is twice the job interval, so a run that was
/// skipped (previous still in flight) does not open a gap.
async fn sweep_all_sessions(
    ctx: &Arc<AppContext>,
    job: &str,
    interval: Duration,
    kind: SweepKind,
) -> Result<()> {
    let since = Utc::now()
        - chrono::Duration::from_std(interval * 2).unwrap_or_else(|_| chrono::Duration::hours(1));

    let sessions = ctx.sessions.active_ids().await;
    let total = sessions.len();
    let mut failed = 0_usize;

    for session in &sessions {
        let outcome = match kind {
            SweepKind::Reply => ctx.run_reply_sweep(session, since).await,
            SweepKind::Bounce => ctx.run_bounce_sweep(session, since).await,
        };
        match outcome {
            Ok(tally) => {
                if tally.matched > 0 || tally.errors > 0 {
                    info!(
                        job,
                        session = %session,
                        scanned = tally.scanned,
                        matched = tally.matched,
                        updated = tally.updated,
                        errors = tally.errors,
                        "sweep finished for session"
                    );
                }
            }
            Err(e) => {
                warn!(job, session = %session, error = %e, "sweep failed for session");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(Error::Store(format!(
            "{job}: {failed}/{total} sessions failed"
        )));
    }
    Ok(())
}
