//! Background deletion of expired rows.
//!
//! Two independent jobs on a one-hour wall-clock interval, one per token
//! kind. The sweep bounds storage growth; the repositories' fetch-time
//! expiry check is what guarantees no stale row is ever observed. Both are
//! needed.

use std::time::Duration;

use authgate_tokio::{shutdown::ShutdownChannel, task::NamedTask};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::repository::{PendingActionRepo, RefreshTokenRepo};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

enum Sweep {
    RefreshTokens(RefreshTokenRepo),
    PendingActions(PendingActionRepo),
}

impl Sweep {
    fn task_name(&self) -> &'static str {
        match self {
            Self::RefreshTokens(_) => "refresh-token-sweeper",
            Self::PendingActions(_) => "pending-action-sweeper",
        }
    }

    async fn run_once(&self) {
        let now = OffsetDateTime::now_utc();
        let (kind, result) = match self {
            Self::RefreshTokens(repo) =>
                ("refresh tokens", repo.delete_expired(now).await),
            Self::PendingActions(repo) =>
                ("pending actions", repo.delete_expired(now).await),
        };
        match result {
            Ok(deleted) => info!("Swept {deleted} expired {kind}"),
            Err(err) => warn!("Sweep of expired {kind} failed: {err}"),
        }
    }
}

pub fn spawn_sweepers(
    refresh_tokens: RefreshTokenRepo,
    pending_actions: PendingActionRepo,
    shutdown: &ShutdownChannel,
) -> Vec<NamedTask> {
    vec![
        spawn_sweeper(Sweep::RefreshTokens(refresh_tokens), shutdown.clone()),
        spawn_sweeper(Sweep::PendingActions(pending_actions), shutdown.clone()),
    ]
}

fn spawn_sweeper(sweep: Sweep, shutdown: ShutdownChannel) -> NamedTask {
    NamedTask::spawn(sweep.task_name(), async move {
        let mut timer = tokio::time::interval(SWEEP_INTERVAL);
        timer.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Delay,
        );
        // An interval's first tick completes immediately; push the first
        // sweep out to one full period after startup.
        timer.reset();

        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                _ = timer.tick() => sweep.run_once().await,
            }
        }
    })
}
