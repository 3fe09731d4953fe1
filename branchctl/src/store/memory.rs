//! In-memory [`BranchStore`] used by tests and by `storage: memory` in the
//! development config. Single mutex around the whole dataset; branch volumes
//! are small enough (hundreds, not millions) that contention is a non-issue.

use super::{
    AccessGrant, ActivityEvent, Branch, BranchFilter, BranchStore, GitHubRepoConfig, NewActivityEvent, NewBranch,
    Result, StoreError,
};
use crate::types::{BranchId, BranchStatus, BranchType, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Dataset {
    branches: HashMap<BranchId, Branch>,
    grants: HashMap<(BranchId, UserId), AccessGrant>,
    github_configs: HashMap<String, GitHubRepoConfig>,
    activity: Vec<ActivityEvent>,
    selections: HashMap<UserId, BranchId>,
    next_event_id: i64,
}

/// Mutex-guarded in-memory dataset mirroring the Postgres schema's semantics:
/// slug uniqueness, check-and-set transitions, grant cascade on branch delete,
/// activity events surviving branch deletion.
pub struct InMemoryBranchStore {
    data: Mutex<Dataset>,
}

impl InMemoryBranchStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Dataset {
                next_event_id: 1,
                ..Dataset::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Dataset> {
        // Poisoning only happens if another accessor panicked; propagating the
        // panic is the honest response for a test fixture.
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemoryBranchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BranchStore for InMemoryBranchStore {
    async fn insert_branch(&self, branch: NewBranch) -> Result<Branch> {
        let mut data = self.lock();
        if data.branches.values().any(|b| b.slug == branch.slug) {
            return Err(StoreError::UniqueViolation {
                constraint: Some("branches_slug_key".to_string()),
                message: format!("duplicate slug: {}", branch.slug),
            });
        }
        let now = Utc::now();
        let row = Branch {
            id: branch.id,
            slug: branch.slug,
            name: branch.name,
            parent_branch_id: branch.parent_branch_id,
            branch_type: branch.branch_type,
            data_clone_mode: branch.data_clone_mode,
            status: branch.status,
            created_by: branch.created_by,
            github_pr_number: branch.github_pr_number,
            github_pr_url: branch.github_pr_url,
            github_repo: branch.github_repo,
            expires_at: branch.expires_at,
            created_at: now,
            updated_at: now,
        };
        data.branches.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_branch(&self, id: BranchId) -> Result<Option<Branch>> {
        Ok(self.lock().branches.get(&id).cloned())
    }

    async fn get_branch_by_slug(&self, slug: &str) -> Result<Option<Branch>> {
        Ok(self.lock().branches.values().find(|b| b.slug == slug).cloned())
    }

    async fn main_branch(&self) -> Result<Branch> {
        self.lock()
            .branches
            .values()
            .find(|b| b.branch_type == BranchType::Main)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_branches(&self, filter: &BranchFilter) -> Result<Vec<Branch>> {
        let data = self.lock();
        let mut rows: Vec<Branch> = data
            .branches
            .values()
            .filter(|b| filter.status.is_none_or(|s| b.status == s))
            .filter(|b| filter.branch_type.is_none_or(|t| b.branch_type == t))
            .filter(|b| {
                filter
                    .github_repo
                    .as_deref()
                    .is_none_or(|r| b.github_repo.as_deref() == Some(r))
            })
            .filter(|b| filter.created_by.is_none_or(|u| b.created_by == u))
            .filter(|b| {
                filter.visible_to.is_none_or(|u| {
                    b.is_main() || b.created_by == u || data.grants.contains_key(&(b.id, u))
                })
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(rows
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn transition_status(&self, id: BranchId, from: BranchStatus, to: BranchStatus) -> Result<Branch> {
        let mut data = self.lock();
        let branch = data.branches.get_mut(&id).ok_or(StoreError::NotFound)?;
        if branch.status != from {
            return Err(StoreError::StatusConflict {
                expected: from,
                actual: branch.status,
            });
        }
        branch.status = to;
        branch.updated_at = Utc::now();
        Ok(branch.clone())
    }

    async fn mark_error(&self, id: BranchId) -> Result<()> {
        let mut data = self.lock();
        let branch = data.branches.get_mut(&id).ok_or(StoreError::NotFound)?;
        branch.status = BranchStatus::Error;
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_branch(&self, id: BranchId) -> Result<bool> {
        let mut data = self.lock();
        let existed = data.branches.remove(&id).is_some();
        if existed {
            data.grants.retain(|(branch_id, _), _| *branch_id != id);
            data.selections.retain(|_, selected| *selected != id);
            // Children outlive their parent, as in the schema's SET NULL.
            for branch in data.branches.values_mut() {
                if branch.parent_branch_id == Some(id) {
                    branch.parent_branch_id = None;
                }
            }
        }
        Ok(existed)
    }

    async fn count_branches_by_creator(&self, user_id: UserId) -> Result<i64> {
        Ok(self
            .lock()
            .branches
            .values()
            .filter(|b| b.created_by == user_id && !b.is_main())
            .count() as i64)
    }

    async fn count_branches(&self) -> Result<i64> {
        Ok(self.lock().branches.values().filter(|b| !b.is_main()).count() as i64)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Branch>> {
        Ok(self
            .lock()
            .branches
            .values()
            .filter(|b| b.status == BranchStatus::Active && b.expires_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    async fn upsert_grant(&self, grant: AccessGrant) -> Result<()> {
        self.lock().grants.insert((grant.branch_id, grant.user_id), grant);
        Ok(())
    }

    async fn get_grant(&self, branch_id: BranchId, user_id: UserId) -> Result<Option<AccessGrant>> {
        Ok(self.lock().grants.get(&(branch_id, user_id)).cloned())
    }

    async fn delete_grant(&self, branch_id: BranchId, user_id: UserId) -> Result<bool> {
        Ok(self.lock().grants.remove(&(branch_id, user_id)).is_some())
    }

    async fn list_grants(&self, branch_id: BranchId) -> Result<Vec<AccessGrant>> {
        let mut grants: Vec<AccessGrant> = self
            .lock()
            .grants
            .values()
            .filter(|g| g.branch_id == branch_id)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.granted_at);
        Ok(grants)
    }

    async fn upsert_github_config(&self, config: GitHubRepoConfig) -> Result<GitHubRepoConfig> {
        let mut config = config;
        config.updated_at = Utc::now();
        self.lock()
            .github_configs
            .insert(config.repository.clone(), config.clone());
        Ok(config)
    }

    async fn get_github_config(&self, repository: &str) -> Result<Option<GitHubRepoConfig>> {
        Ok(self.lock().github_configs.get(repository).cloned())
    }

    async fn list_github_configs(&self) -> Result<Vec<GitHubRepoConfig>> {
        let mut configs: Vec<GitHubRepoConfig> = self.lock().github_configs.values().cloned().collect();
        configs.sort_by(|a, b| a.repository.cmp(&b.repository));
        Ok(configs)
    }

    async fn delete_github_config(&self, repository: &str) -> Result<bool> {
        Ok(self.lock().github_configs.remove(repository).is_some())
    }

    async fn append_activity(&self, event: NewActivityEvent) -> Result<()> {
        let mut data = self.lock();
        let id = data.next_event_id;
        data.next_event_id += 1;
        data.activity.push(ActivityEvent {
            id,
            branch_id: event.branch_id,
            actor: event.actor,
            action: event.action,
            detail: event.detail,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn list_activity(&self, branch_id: BranchId, limit: i64, offset: i64) -> Result<Vec<ActivityEvent>> {
        Ok(self
            .lock()
            .activity
            .iter()
            .rev()
            .filter(|e| e.branch_id == branch_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_selection(&self, user_id: UserId, branch_id: BranchId) -> Result<()> {
        self.lock().selections.insert(user_id, branch_id);
        Ok(())
    }

    async fn get_selection(&self, user_id: UserId) -> Result<Option<BranchId>> {
        Ok(self.lock().selections.get(&user_id).copied())
    }

    async fn clear_selection(&self, user_id: UserId) -> Result<()> {
        self.lock().selections.remove(&user_id);
        Ok(())
    }
}
