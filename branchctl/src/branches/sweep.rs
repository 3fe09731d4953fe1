//! Background sweepers.
//!
//! Two periodic loops run alongside the API: the expiration sweep moves
//! overdue branches to `expired`, cuts their connections, and hands them to
//! the background teardown, and the idle sweep reaps pooled connections that
//! have sat unused past their TTL. Both
//! poll on an interval with missed ticks skipped, and stop on the shared
//! shutdown token.

use super::BranchManager;
use crate::pool::PoolService;
use crate::store::StoreError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run_expiration_sweep(manager: Arc<BranchManager>, interval: Duration, shutdown: CancellationToken) {
    info!("Starting expiration sweep (every {})", humantime::format_duration(interval));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&manager).await;
            }
            _ = shutdown.cancelled() => {
                info!("Expiration sweep shutting down");
                return;
            }
        }
    }
}

async fn sweep_once(manager: &BranchManager) {
    let overdue = match manager.store().list_expired(Utc::now()).await {
        Ok(branches) => branches,
        Err(err) => {
            error!(error = %err, "expiration sweep failed to list overdue branches");
            return;
        }
    };
    for branch in overdue {
        match manager.expire(&branch).await {
            Ok(_) => {}
            // Lost the race to a concurrent reset/delete; next tick re-evaluates.
            Err(crate::errors::Error::Store(StoreError::StatusConflict { .. })) => {
                warn!(branch = %branch.slug, "branch changed state during expiration sweep");
            }
            Err(err) => {
                error!(branch = %branch.slug, error = %err, "failed to expire branch");
            }
        }
    }
}

pub async fn run_idle_sweep(pools: Arc<dyn PoolService>, interval: Duration, shutdown: CancellationToken) {
    info!("Starting idle connection sweep (every {})", humantime::format_duration(interval));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                pools.sweep_idle();
            }
            _ = shutdown.cancelled() => {
                info!("Idle connection sweep shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branches::SYSTEM_ACTOR;
    use crate::branches::test_support::{Fixture, create_req, fixture, settle};
    use crate::store::Branch;
    use crate::types::{ActivityAction, BranchStatus, BranchType};

    async fn create_overdue(fx: &Fixture, name: &str) -> Branch {
        let mut req = create_req(name);
        req.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        let branch = fx.manager.create(&fx.member, req).await.unwrap();
        let settled = settle(&fx.store, branch.id).await.unwrap();
        assert_eq!(settled.status, BranchStatus::Active);
        settled
    }

    #[test_log::test(tokio::test)]
    async fn test_sweep_tears_down_only_overdue_branches() {
        let fx = fixture().await;
        let overdue = create_overdue(&fx, "overdue").await;
        let mut fresh_req = create_req("fresh");
        fresh_req.branch_type = BranchType::Persistent;
        let fresh = fx.manager.create(&fx.member, fresh_req).await.unwrap();
        settle(&fx.store, fresh.id).await.unwrap();

        sweep_once(&fx.manager).await;

        // The overdue branch is expired and then fully torn down.
        assert!(settle(&fx.store, overdue.id).await.is_none());
        let fresh = fx.store.get_branch(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, BranchStatus::Active);

        // Both steps are audited as system actions.
        let events = fx.store.list_activity(overdue.id, 10, 0).await.unwrap();
        assert!(
            events
                .iter()
                .any(|e| e.action == ActivityAction::Expired && e.actor == SYSTEM_ACTOR)
        );
        assert!(
            events
                .iter()
                .any(|e| e.action == ActivityAction::Deleted && e.actor == SYSTEM_ACTOR)
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_sweep_is_idempotent() {
        let fx = fixture().await;
        let overdue = create_overdue(&fx, "overdue").await;

        sweep_once(&fx.manager).await;
        assert!(settle(&fx.store, overdue.id).await.is_none());
        // Second pass sees no active overdue branches and does nothing.
        sweep_once(&fx.manager).await;
    }
}
