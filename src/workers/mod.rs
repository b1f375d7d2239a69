//! Long-lived background tasks.
//!
//! Each worker is a cancellable loop: it ticks, does one bounded unit of
//! work against the DB or cache, and logs failures without dying. Workers
//! share no mutable state with the request path except through the database
//! and the cache.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::SharedCache;
use crate::chain::anchor::{anchor_if_due, AnchorPolicy, LedgerClient};
use crate::polls::due_transition;
use crate::store::enrollment as session_store;
use crate::store::{polls as poll_store, rewards};

const STATUS_TICK: Duration = Duration::from_secs(30);
const REWARD_TICK: Duration = Duration::from_secs(30);
const ANCHOR_TICK: Duration = Duration::from_secs(30);
const MAINTENANCE_TICK: Duration = Duration::from_secs(60);

/// Running worker set with a shared cancel signal.
pub struct Workers {
    cancel_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawn the API-process workers.
    pub fn spawn(
        pool: SqlitePool,
        cache: SharedCache,
        ledger: Arc<dyn LedgerClient>,
        anchor_policy: AnchorPolicy,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(run_status_monitor(pool.clone(), cancel_rx.clone())),
            tokio::spawn(run_reward_dispatcher(pool.clone(), cancel_rx.clone())),
            tokio::spawn(run_anchor_submitter(
                pool.clone(),
                ledger,
                anchor_policy,
                cancel_rx.clone(),
            )),
            tokio::spawn(run_maintenance(pool, cache, cancel_rx)),
        ];
        Self { cancel_tx, handles }
    }

    /// Signal every worker and wait for them to drain.
    pub async fn shutdown(self) {
        let _ = self.cancel_tx.send(true);
        let _ = futures::future::join_all(self.handles).await;
        info!("background workers stopped");
    }
}

macro_rules! worker_loop {
    ($tick:expr, $cancel:expr, $body:expr) => {{
        let mut ticker = tokio::time::interval($tick);
        loop {
            tokio::select! {
                _ = ticker.tick() => { $body.await; }
                _ = $cancel.changed() => {
                    if *$cancel.borrow() { break; }
                }
            }
        }
    }};
}

/// scheduled → active → ended, on schedule.
pub async fn run_status_monitor(pool: SqlitePool, mut cancel: watch::Receiver<bool>) {
    worker_loop!(STATUS_TICK, cancel, async {
        if let Err(e) = status_monitor_tick(&pool).await {
            warn!(error = %e, "poll status monitor tick failed");
        }
    });
}

pub async fn status_monitor_tick(pool: &SqlitePool) -> Result<(), crate::store::StoreError> {
    let now = crate::db::now();
    for poll in poll_store::published(pool).await? {
        if let Some(next) = due_transition(poll.status, poll.starts_at, poll.ends_at, now) {
            info!(poll = %poll.id, from = poll.status.as_str(), to = next.as_str(), "poll status transition");
            poll_store::set_status(pool, &poll.id, next).await?;
        }
    }
    Ok(())
}

/// Drain pending reward credits. Actual delivery (push notification, wallet
/// credit) is an external collaborator; this marks the handoff.
pub async fn run_reward_dispatcher(pool: SqlitePool, mut cancel: watch::Receiver<bool>) {
    worker_loop!(REWARD_TICK, cancel, async {
        if let Err(e) = reward_tick(&pool).await {
            warn!(error = %e, "reward dispatcher tick failed");
        }
    });
}

pub async fn reward_tick(pool: &SqlitePool) -> Result<usize, crate::store::StoreError> {
    let batch = rewards::pending(pool, 50).await?;
    let count = batch.len();
    for credit in batch {
        info!(user = %credit.user_id, poll = %credit.poll_id, amount = credit.amount, "dispatching reward");
        rewards::mark_dispatched(pool, &credit.id).await?;
    }
    Ok(count)
}

/// Submit chain roots to the ledger when the anchor policy says so.
pub async fn run_anchor_submitter(
    pool: SqlitePool,
    ledger: Arc<dyn LedgerClient>,
    policy: AnchorPolicy,
    mut cancel: watch::Receiver<bool>,
) {
    worker_loop!(ANCHOR_TICK, cancel, async {
        if let Err(e) = anchor_if_due(&pool, ledger.as_ref(), policy).await {
            warn!(error = %e, "anchor submitter tick failed");
        }
    });
}

/// Expired-key sweep and enrollment session reaping.
pub async fn run_maintenance(
    pool: SqlitePool,
    cache: SharedCache,
    mut cancel: watch::Receiver<bool>,
) {
    worker_loop!(MAINTENANCE_TICK, cancel, async {
        cache.sweep();
        if let Err(e) = session_store::reap_expired(&pool).await {
            warn!(error = %e, "enrollment session reaping failed");
        }
    });
}
