//! Branch lifecycle: creation, reset, expiry, deletion, sharing, and the
//! GitHub automation policy that drives preview branches.
//!
//! The manager owns every branch status transition. Transitions go through the
//! store's check-and-set so concurrent operations on the same branch serialize
//! into one winner and clean conflict errors for the rest.

pub mod access;
pub mod provision;
pub mod resolver;
pub mod slug;
pub mod sweep;

use crate::auth::CurrentUser;
use crate::config::BranchingConfig;
use crate::errors::{Error, Result};
use crate::pool::PoolService;
use crate::store::{
    ActivityEvent, Branch, BranchFilter, BranchStore, GitHubRepoConfig, NewActivityEvent, NewBranch, StoreError,
};
use crate::types::{AccessLevel, ActivityAction, BranchId, BranchStatus, BranchType, DataCloneMode, UserId};
use access::AccessControl;
use chrono::{DateTime, Utc};
use provision::Provisioner;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Actor recorded for operations the service performs on its own (expiry,
/// webhook-driven automation).
pub const SYSTEM_ACTOR: UserId = Uuid::nil();

/// Parameters for creating a branch, after API-level validation.
#[derive(Debug, Clone)]
pub struct CreateBranch {
    pub name: String,
    pub branch_type: BranchType,
    pub data_clone_mode: DataCloneMode,
    /// Defaults to the main branch.
    pub parent_branch_id: Option<BranchId>,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub github_repo: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Append to the audit trail. Logging must never fail the operation it
/// documents.
async fn record_event(
    store: &Arc<dyn BranchStore>,
    branch_id: BranchId,
    actor: UserId,
    action: ActivityAction,
    detail: Option<String>,
) {
    if let Err(err) = store
        .append_activity(NewActivityEvent {
            branch_id,
            actor,
            action,
            detail,
        })
        .await
    {
        warn!(branch = %branch_id, %action, error = %err, "failed to record activity event");
    }
}

/// Force the branch into `error` and record what went wrong. Used by the
/// background lifecycle tasks, which have no caller to report to.
async fn mark_failed(store: &Arc<dyn BranchStore>, id: BranchId, actor: UserId, cause: String) {
    if let Err(err) = store.mark_error(id).await {
        error!(branch = %id, error = %err, "failed to mark branch as errored");
    }
    record_event(store, id, actor, ActivityAction::Error, Some(cause)).await;
}

pub struct BranchManager {
    store: Arc<dyn BranchStore>,
    provisioner: Arc<dyn Provisioner>,
    pools: Arc<dyn PoolService>,
    access: AccessControl,
    config: BranchingConfig,
    /// Background provisioning and teardown tasks, drained on shutdown.
    tasks: TaskTracker,
}

impl BranchManager {
    pub fn new(
        store: Arc<dyn BranchStore>,
        provisioner: Arc<dyn Provisioner>,
        pools: Arc<dyn PoolService>,
        config: BranchingConfig,
    ) -> Self {
        let access = AccessControl::new(store.clone());
        Self {
            store,
            provisioner,
            pools,
            access,
            config,
            tasks: TaskTracker::new(),
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn store(&self) -> &Arc<dyn BranchStore> {
        &self.store
    }

    /// Wait for in-flight provisioning and teardown tasks to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Every mutating operation checks this first; when branching is switched
    /// off the API answers 503 before any other validation runs.
    fn ensure_enabled(&self) -> Result<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(Error::BranchingDisabled)
        }
    }

    async fn record(&self, branch_id: BranchId, actor: UserId, action: ActivityAction, detail: Option<String>) {
        record_event(&self.store, branch_id, actor, action, detail).await;
    }

    /// Fetch a branch the actor is allowed to see, or NotFound.
    pub async fn get_visible(&self, actor: &CurrentUser, id: BranchId) -> Result<Branch> {
        let branch = self
            .store
            .get_branch(id)
            .await?
            .ok_or_else(|| Error::not_found("Branch", id))?;
        if self.access.level_for(actor, &branch).await?.is_none() {
            return Err(Error::not_found("Branch", id));
        }
        Ok(branch)
    }

    pub async fn get_visible_by_slug(&self, actor: &CurrentUser, slug: &str) -> Result<Branch> {
        let branch = self
            .store
            .get_branch_by_slug(slug)
            .await?
            .ok_or_else(|| Error::not_found("Branch", slug))?;
        if self.access.level_for(actor, &branch).await?.is_none() {
            return Err(Error::not_found("Branch", slug));
        }
        Ok(branch)
    }

    /// List branches visible to the actor. Project admins see everything.
    pub async fn list(&self, actor: &CurrentUser, mut filter: BranchFilter) -> Result<Vec<Branch>> {
        if !actor.is_admin() {
            filter.visible_to = Some(actor.id);
        }
        Ok(self.store.list_branches(&filter).await?)
    }

    async fn check_quotas(&self, actor: &CurrentUser) -> Result<()> {
        let total = self.store.count_branches().await?;
        if total >= self.config.max_branches_total {
            return Err(Error::QuotaExceeded {
                message: format!("project limit of {} branches reached", self.config.max_branches_total),
            });
        }
        let mine = self.store.count_branches_by_creator(actor.id).await?;
        if mine >= self.config.max_branches_per_user {
            return Err(Error::QuotaExceeded {
                message: format!(
                    "per-user limit of {} branches reached",
                    self.config.max_branches_per_user
                ),
            });
        }
        Ok(())
    }

    /// Insert the branch as `creating` and provision its database from the
    /// parent in the background. The returned row is still `creating`; it
    /// flips to `active` (or `error`) when provisioning finishes.
    pub async fn create(&self, actor: &CurrentUser, req: CreateBranch) -> Result<Branch> {
        self.ensure_enabled()?;
        if req.branch_type == BranchType::Main {
            return Err(Error::validation("The main branch cannot be created explicitly"));
        }
        let base_slug =
            slug::slugify(&req.name).ok_or_else(|| Error::validation("Branch name has no usable characters"))?;
        self.check_quotas(actor).await?;

        let parent = match req.parent_branch_id {
            Some(parent_id) => self
                .store
                .get_branch(parent_id)
                .await?
                .ok_or_else(|| Error::not_found("Parent branch", parent_id))?,
            None => self.store.main_branch().await.map_err(|_| Error::Internal {
                operation: "resolve the main branch".to_string(),
            })?,
        };
        if parent.status != BranchStatus::Active {
            return Err(Error::InvalidState {
                status: parent.status,
                action: "branch from it".to_string(),
            });
        }

        let expires_at = req.expires_at.or_else(|| {
            (req.branch_type == BranchType::Preview)
                .then(|| self.config.default_preview_ttl.map(|ttl| Utc::now() + ttl))
                .flatten()
        });

        let new_branch = |slug: String| NewBranch {
            id: Uuid::new_v4(),
            slug,
            name: req.name.clone(),
            parent_branch_id: Some(parent.id),
            branch_type: req.branch_type,
            data_clone_mode: req.data_clone_mode,
            status: BranchStatus::Creating,
            created_by: actor.id,
            github_pr_number: req.github_pr_number,
            github_pr_url: req.github_pr_url.clone(),
            github_repo: req.github_repo.clone(),
            expires_at,
        };

        // Let the unique constraint arbitrate slug races, retrying once with a
        // random suffix.
        let branch = match self.store.insert_branch(new_branch(base_slug.clone())).await {
            Ok(branch) => branch,
            Err(StoreError::UniqueViolation { .. }) => {
                self.store.insert_branch(new_branch(slug::with_suffix(&base_slug))).await?
            }
            Err(err) => return Err(err.into()),
        };

        info!(branch = %branch.slug, parent = %parent.slug, "creating branch");
        self.record(branch.id, actor.id, ActivityAction::Created, Some(format!("from {}", parent.slug)))
            .await;
        self.spawn_provision(branch.clone(), parent, actor.id);
        Ok(branch)
    }

    fn spawn_provision(&self, branch: Branch, parent: Branch, actor: UserId) {
        let store = self.store.clone();
        let provisioner = self.provisioner.clone();
        self.tasks.spawn(async move {
            if let Err(err) = provisioner.provision(&branch, &parent).await {
                error!(branch = %branch.slug, error = %err, "branch provisioning failed");
                mark_failed(&store, branch.id, actor, err.to_string()).await;
                return;
            }
            match store
                .transition_status(branch.id, BranchStatus::Creating, BranchStatus::Active)
                .await
            {
                Ok(active) => info!(branch = %active.slug, "branch provisioned"),
                Err(err) => {
                    error!(branch = %branch.slug, error = %err, "failed to activate provisioned branch");
                    mark_failed(&store, branch.id, actor, err.to_string()).await;
                }
            }
        });
    }

    /// Discard the branch's data and rebuild from the parent's current state.
    /// The returned row is `resetting`; the rebuild happens in the background.
    pub async fn reset(&self, actor: &CurrentUser, id: BranchId) -> Result<Branch> {
        self.ensure_enabled()?;
        let branch = self.get_visible(actor, id).await?;
        self.access.require(actor, &branch, AccessLevel::Write, "reset").await?;
        if branch.is_main() {
            return Err(Error::validation("The main branch cannot be reset"));
        }

        let parent = match branch.parent_branch_id {
            Some(parent_id) => self.store.get_branch(parent_id).await?,
            None => None,
        };
        // A deleted parent falls back to main so resets keep working.
        let parent = match parent {
            Some(parent) => parent,
            None => self.store.main_branch().await.map_err(|_| Error::Internal {
                operation: "resolve the main branch".to_string(),
            })?,
        };

        let branch = self
            .store
            .transition_status(id, BranchStatus::Active, BranchStatus::Resetting)
            .await
            .map_err(|err| match err {
                StoreError::StatusConflict { actual, .. } => Error::InvalidState {
                    status: actual,
                    action: "reset".to_string(),
                },
                other => other.into(),
            })?;

        // Connections to the old data must not survive the rebuild.
        self.pools.evict(id);
        self.spawn_reset(branch.clone(), parent, actor.id);
        Ok(branch)
    }

    fn spawn_reset(&self, branch: Branch, parent: Branch, actor: UserId) {
        let store = self.store.clone();
        let provisioner = self.provisioner.clone();
        self.tasks.spawn(async move {
            if let Err(err) = provisioner.reset(&branch, &parent).await {
                error!(branch = %branch.slug, error = %err, "branch reset failed");
                mark_failed(&store, branch.id, actor, err.to_string()).await;
                return;
            }
            match store
                .transition_status(branch.id, BranchStatus::Resetting, BranchStatus::Active)
                .await
            {
                Ok(active) => {
                    record_event(
                        &store,
                        branch.id,
                        actor,
                        ActivityAction::Reset,
                        Some(format!("from {}", parent.slug)),
                    )
                    .await;
                    info!(branch = %active.slug, "branch reset complete");
                }
                Err(err) => {
                    error!(branch = %branch.slug, error = %err, "failed to reactivate reset branch");
                    mark_failed(&store, branch.id, actor, err.to_string()).await;
                }
            }
        });
    }

    /// Move the branch to `deleting` and tear down its database in the
    /// background. Grants cascade with the row; activity events stay.
    pub async fn delete(&self, actor: &CurrentUser, id: BranchId) -> Result<()> {
        self.ensure_enabled()?;
        let branch = self.get_visible(actor, id).await?;
        self.access.require(actor, &branch, AccessLevel::Admin, "delete").await?;
        if branch.is_main() {
            return Err(Error::validation("The main branch cannot be deleted"));
        }
        if !branch.status.can_transition_to(BranchStatus::Deleting) {
            return Err(Error::InvalidState {
                status: branch.status,
                action: "delete".to_string(),
            });
        }

        let branch = self
            .store
            .transition_status(id, branch.status, BranchStatus::Deleting)
            .await
            .map_err(|err| match err {
                StoreError::StatusConflict { actual, .. } => Error::InvalidState {
                    status: actual,
                    action: "delete".to_string(),
                },
                other => other.into(),
            })?;

        self.pools.evict(id);
        self.spawn_teardown(branch, actor.id);
        Ok(())
    }

    fn spawn_teardown(&self, branch: Branch, actor: UserId) {
        let store = self.store.clone();
        let provisioner = self.provisioner.clone();
        self.tasks.spawn(async move {
            if let Err(err) = provisioner.teardown(&branch).await {
                // The row stays in error; delete can be retried.
                error!(branch = %branch.slug, error = %err, "branch teardown failed");
                mark_failed(&store, branch.id, actor, err.to_string()).await;
                return;
            }
            if let Err(err) = store.delete_branch(branch.id).await {
                error!(branch = %branch.slug, error = %err, "failed to remove branch row");
                return;
            }
            record_event(&store, branch.id, actor, ActivityAction::Deleted, Some(branch.slug.clone())).await;
            info!(branch = %branch.slug, "branch deleted");
        });
    }

    /// Move an overdue branch to `expired`, cut its connections, and tear it
    /// down in the background. Called by the expiration sweep.
    pub async fn expire(&self, branch: &Branch) -> Result<Branch> {
        let expired = self
            .store
            .transition_status(branch.id, BranchStatus::Active, BranchStatus::Expired)
            .await?;
        self.pools.evict(branch.id);
        self.record(branch.id, SYSTEM_ACTOR, ActivityAction::Expired, None).await;
        info!(branch = %branch.slug, "branch expired");

        let deleting = self
            .store
            .transition_status(branch.id, BranchStatus::Expired, BranchStatus::Deleting)
            .await?;
        self.spawn_teardown(deleting, SYSTEM_ACTOR);
        Ok(expired)
    }

    pub async fn activity(
        &self,
        actor: &CurrentUser,
        id: BranchId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ActivityEvent>> {
        let branch = self.get_visible(actor, id).await?;
        self.access.require(actor, &branch, AccessLevel::Read, "view").await?;
        Ok(self.store.list_activity(branch.id, limit, offset).await?)
    }

    // Sharing wraps access control to keep the audit trail in one place.

    pub async fn share(
        &self,
        actor: &CurrentUser,
        id: BranchId,
        user_id: UserId,
        level: AccessLevel,
    ) -> Result<crate::store::AccessGrant> {
        self.ensure_enabled()?;
        let branch = self.get_visible(actor, id).await?;
        let grant = self.access.grant(actor, &branch, user_id, level).await?;
        self.record(
            id,
            actor.id,
            ActivityAction::AccessGranted,
            Some(format!("{level} to {user_id}")),
        )
        .await;
        Ok(grant)
    }

    pub async fn unshare(&self, actor: &CurrentUser, id: BranchId, user_id: UserId) -> Result<()> {
        self.ensure_enabled()?;
        let branch = self.get_visible(actor, id).await?;
        if self.access.revoke(actor, &branch, user_id).await? {
            self.record(id, actor.id, ActivityAction::AccessRevoked, Some(user_id.to_string()))
                .await;
        }
        Ok(())
    }

    // GitHub repo automation policy. Project-admin only: it decides what the
    // webhook pipeline may do unattended.

    fn require_project_admin(&self, actor: &CurrentUser, action: &str) -> Result<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(Error::Forbidden {
                action: action.to_string(),
                branch: "automation config".to_string(),
            })
        }
    }

    pub async fn upsert_github_config(&self, actor: &CurrentUser, config: GitHubRepoConfig) -> Result<GitHubRepoConfig> {
        self.ensure_enabled()?;
        self.require_project_admin(actor, "configure")?;
        if !config.repository.contains('/') || config.repository.split('/').any(str::is_empty) {
            return Err(Error::validation("Repository must be in owner/name form"));
        }
        Ok(self.store.upsert_github_config(config).await?)
    }

    pub async fn get_github_config(&self, actor: &CurrentUser, repository: &str) -> Result<GitHubRepoConfig> {
        self.require_project_admin(actor, "view")?;
        self.store
            .get_github_config(repository)
            .await?
            .ok_or_else(|| Error::not_found("GitHub config", repository))
    }

    pub async fn list_github_configs(&self, actor: &CurrentUser) -> Result<Vec<GitHubRepoConfig>> {
        self.require_project_admin(actor, "view")?;
        Ok(self.store.list_github_configs().await?)
    }

    pub async fn delete_github_config(&self, actor: &CurrentUser, repository: &str) -> Result<()> {
        self.ensure_enabled()?;
        self.require_project_admin(actor, "configure")?;
        if !self.store.delete_github_config(repository).await? {
            return Err(Error::not_found("GitHub config", repository));
        }
        Ok(())
    }

    // Active-branch selection.

    /// Select the branch the actor's subsequent data-plane traffic targets.
    pub async fn select_branch(&self, actor: &CurrentUser, id: BranchId) -> Result<Branch> {
        self.ensure_enabled()?;
        let branch = self.get_visible(actor, id).await?;
        self.access.require(actor, &branch, AccessLevel::Read, "select").await?;
        if branch.status != BranchStatus::Active {
            return Err(Error::InvalidState {
                status: branch.status,
                action: "select".to_string(),
            });
        }
        self.store.set_selection(actor.id, branch.id).await?;
        Ok(branch)
    }

    pub async fn clear_selection(&self, actor: &CurrentUser) -> Result<()> {
        self.ensure_enabled()?;
        Ok(self.store.clear_selection(actor.id).await?)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::http::StatusCode;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_create_provisions_from_main_and_activates() {
        let fx = fixture().await;
        let branch = fx.manager.create(&fx.member, create_req("Feature X")).await.unwrap();

        // The call returns immediately with the branch still provisioning.
        assert_eq!(branch.slug, "feature-x");
        assert_eq!(branch.status, BranchStatus::Creating);
        assert_eq!(branch.parent_branch_id, Some(fx.main.id));
        // Preview branches inherit the default TTL.
        assert!(branch.expires_at.is_some());

        let settled = settle(&fx.store, branch.id).await.unwrap();
        assert_eq!(settled.status, BranchStatus::Active);
        assert_eq!(
            fx.provisioner.calls.lock().unwrap().as_slice(),
            ["provision feature-x from main"]
        );

        let activity = fx.manager.activity(&fx.member, branch.id, 10, 0).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].action, ActivityAction::Created);
    }

    #[tokio::test]
    async fn test_create_disabled() {
        let mut config = branching_config();
        config.enabled = false;
        let fx = fixture_with_config(config).await;
        let err = fx.manager.create(&fx.member, create_req("x")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_slug_collision_retries_with_suffix() {
        let fx = fixture().await;
        let first = fx.manager.create(&fx.member, create_req("demo")).await.unwrap();
        let second = fx.manager.create(&fx.member, create_req("demo")).await.unwrap();
        assert_eq!(first.slug, "demo");
        assert!(second.slug.starts_with("demo-"));
        assert_ne!(first.slug, second.slug);
    }

    #[tokio::test]
    async fn test_create_enforces_quotas() {
        let mut config = branching_config();
        config.max_branches_per_user = 1;
        let fx = fixture_with_config(config).await;
        fx.manager.create(&fx.member, create_req("one")).await.unwrap();
        let err = fx.manager.create(&fx.member, create_req("two")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_create_provision_failure_surfaces_as_error_status() {
        let fx = fixture().await;
        fx.provisioner.fail_provision.store(true, Ordering::SeqCst);

        // The request itself succeeds; the failure lands on the branch row.
        let branch = fx.manager.create(&fx.member, create_req("doomed")).await.unwrap();
        assert_eq!(branch.status, BranchStatus::Creating);

        let settled = settle(&fx.store, branch.id).await.unwrap();
        assert_eq!(settled.status, BranchStatus::Error);
        let events = fx.store.list_activity(branch.id, 10, 0).await.unwrap();
        assert!(events.iter().any(|e| e.action == ActivityAction::Error));

        // Errored branches can still be deleted by their creator.
        fx.provisioner.fail_provision.store(false, Ordering::SeqCst);
        fx.manager.delete(&fx.member, branch.id).await.unwrap();
        assert!(settle(&fx.store, branch.id).await.is_none());
    }

    #[tokio::test]
    async fn test_reset_evicts_pool_and_rebuilds() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "work").await;

        let resetting = fx.manager.reset(&fx.member, branch.id).await.unwrap();
        assert_eq!(resetting.status, BranchStatus::Resetting);
        assert_eq!(fx.pools.evicted.lock().unwrap().as_slice(), [branch.id]);

        let settled = settle(&fx.store, branch.id).await.unwrap();
        assert_eq!(settled.status, BranchStatus::Active);
        assert!(
            fx.provisioner
                .calls
                .lock()
                .unwrap()
                .contains(&"reset work from main".to_string())
        );
        let events = fx.store.list_activity(branch.id, 10, 0).await.unwrap();
        assert!(events.iter().any(|e| e.action == ActivityAction::Reset));
    }

    #[tokio::test]
    async fn test_reset_requires_write() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "mine").await;

        let outsider = CurrentUser {
            id: Uuid::new_v4(),
            role: crate::types::Role::Member,
        };
        // Invisible to outsiders entirely.
        let err = fx.manager.reset(&outsider, branch.id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        fx.manager
            .share(&fx.member, branch.id, outsider.id, AccessLevel::Read)
            .await
            .unwrap();
        let err = fx.manager.reset(&outsider, branch.id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_main_is_protected() {
        let fx = fixture().await;
        let err = fx.manager.reset(&fx.admin, fx.main.id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = fx.manager.delete(&fx.admin, fx.main.id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_tears_down_and_keeps_audit_trail() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "gone").await;
        fx.manager.delete(&fx.member, branch.id).await.unwrap();

        assert!(settle(&fx.store, branch.id).await.is_none());
        assert!(
            fx.provisioner
                .calls
                .lock()
                .unwrap()
                .contains(&"teardown gone".to_string())
        );
        // Events survive the branch.
        let events = fx.store.list_activity(branch.id, 10, 0).await.unwrap();
        assert_eq!(events[0].action, ActivityAction::Deleted);
    }

    #[tokio::test]
    async fn test_delete_teardown_failure_surfaces_as_error_status() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "stuck").await;
        fx.provisioner.fail_teardown.store(true, Ordering::SeqCst);

        fx.manager.delete(&fx.member, branch.id).await.unwrap();
        let settled = settle(&fx.store, branch.id).await.unwrap();
        assert_eq!(settled.status, BranchStatus::Error);

        // Retrying once the backend recovers finishes the job.
        fx.provisioner.fail_teardown.store(false, Ordering::SeqCst);
        fx.manager.delete(&fx.member, branch.id).await.unwrap();
        assert!(settle(&fx.store, branch.id).await.is_none());
    }

    #[tokio::test]
    async fn test_expire_evicts_then_tears_down() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "old").await;
        let expired = fx.manager.expire(&branch).await.unwrap();
        assert_eq!(expired.status, BranchStatus::Expired);
        assert!(fx.pools.evicted.lock().unwrap().contains(&branch.id));

        // Expiry drives a full teardown; only the audit trail remains.
        assert!(settle(&fx.store, branch.id).await.is_none());
        let events = fx.store.list_activity(branch.id, 10, 0).await.unwrap();
        assert!(events.iter().any(|e| e.action == ActivityAction::Expired));
        assert!(
            events
                .iter()
                .any(|e| e.action == ActivityAction::Deleted && e.actor == SYSTEM_ACTOR)
        );
    }

    #[tokio::test]
    async fn test_github_config_is_admin_only() {
        let fx = fixture().await;
        let config = GitHubRepoConfig {
            repository: "acme/api".into(),
            auto_create_on_pr: true,
            auto_delete_on_merge: true,
            default_data_clone_mode: DataCloneMode::SchemaOnly,
            webhook_secret: None,
            updated_at: Utc::now(),
        };

        let err = fx
            .manager
            .upsert_github_config(&fx.member, config.clone())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        fx.manager.upsert_github_config(&fx.admin, config).await.unwrap();
        let listed = fx.manager.list_github_configs(&fx.admin).await.unwrap();
        assert_eq!(listed.len(), 1);

        let err = fx
            .manager
            .upsert_github_config(
                &fx.admin,
                GitHubRepoConfig {
                    repository: "not-a-repo".into(),
                    auto_create_on_pr: false,
                    auto_delete_on_merge: false,
                    default_data_clone_mode: DataCloneMode::SchemaOnly,
                    webhook_secret: None,
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        fx.manager.delete_github_config(&fx.admin, "acme/api").await.unwrap();
        let err = fx
            .manager
            .get_github_config(&fx.admin, "acme/api")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_selection_requires_active_branch() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "sel").await;
        fx.manager.select_branch(&fx.member, branch.id).await.unwrap();
        assert_eq!(
            fx.store.get_selection(fx.member.id).await.unwrap(),
            Some(branch.id)
        );

        fx.store.mark_error(branch.id).await.unwrap();
        let err = fx.manager.select_branch(&fx.member, branch.id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_create_validates_name_before_quota() {
        let mut config = branching_config();
        // Main alone fills the project quota.
        config.max_branches_total = 1;
        let fx = fixture_with_config(config).await;

        let err = fx.manager.create(&fx.member, create_req("???")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = fx.manager.create(&fx.member, create_req("valid name")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_disabled_blocks_every_mutation() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "frozen").await;

        let mut config = branching_config();
        config.enabled = false;
        let disabled = BranchManager::new(
            fx.store.clone(),
            fx.provisioner.clone(),
            fx.pools.clone(),
            config,
        );

        let unavailable = StatusCode::SERVICE_UNAVAILABLE;
        let err = disabled.create(&fx.admin, create_req("x")).await.unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled.reset(&fx.admin, branch.id).await.unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled.delete(&fx.admin, branch.id).await.unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled
            .share(&fx.admin, branch.id, Uuid::new_v4(), AccessLevel::Read)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled
            .unshare(&fx.admin, branch.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled.select_branch(&fx.admin, branch.id).await.unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled.clear_selection(&fx.admin).await.unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled
            .upsert_github_config(
                &fx.admin,
                GitHubRepoConfig {
                    repository: "acme/api".into(),
                    auto_create_on_pr: false,
                    auto_delete_on_merge: false,
                    default_data_clone_mode: DataCloneMode::SchemaOnly,
                    webhook_secret: None,
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), unavailable);
        let err = disabled.delete_github_config(&fx.admin, "acme/api").await.unwrap_err();
        assert_eq!(err.status_code(), unavailable);

        // The gate answers before any other validation.
        let err = disabled.delete(&fx.admin, fx.main.id).await.unwrap_err();
        assert_eq!(err.status_code(), unavailable);

        // Reads stay available.
        disabled.get_visible(&fx.member, branch.id).await.unwrap();
    }
}
