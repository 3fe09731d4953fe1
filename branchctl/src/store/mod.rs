//! Durable metadata store for branches, access grants, GitHub repo configs,
//! and activity events.
//!
//! The store is an interface so the manager and API layers can be exercised
//! against an in-memory fake without touching global state or a live database.
//! [`postgres::PgBranchStore`] is the production implementation;
//! [`memory::InMemoryBranchStore`] backs tests and the embedded development
//! mode.
//!
//! Ownership rules: the branch manager is the only writer of branch rows and
//! activity events, access control is the only writer of grants. The store
//! itself enforces storage-level invariants only (slug uniqueness, atomic
//! status check-and-set); lifecycle legality lives in the manager.

pub mod memory;
pub mod postgres;

use crate::types::{AccessLevel, ActivityAction, BranchId, BranchStatus, BranchType, DataCloneMode, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for store operations that application code can handle
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation (slug or grant collision under race)
    #[error("Unique constraint violation: {message}")]
    UniqueViolation {
        constraint: Option<String>,
        message: String,
    },

    /// Atomic status check-and-set failed: the row moved underneath us
    #[error("Branch status is {actual}, expected {expected}")]
    StatusConflict {
        expected: BranchStatus,
        actual: BranchStatus,
    },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convert from sqlx::Error using sqlx's error categorization
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::UniqueViolation {
                constraint: db_err.constraint().map(|s| s.to_string()),
                message: db_err.message().to_string(),
            },
            _ => StoreError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for store operation results
pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable branch metadata.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Branch {
    pub id: BranchId,
    /// URL-safe name, unique within the project
    pub slug: String,
    pub name: String,
    /// None only for the main branch
    pub parent_branch_id: Option<BranchId>,
    pub branch_type: BranchType,
    pub data_clone_mode: DataCloneMode,
    pub status: BranchStatus,
    pub created_by: UserId,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub github_repo: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn is_main(&self) -> bool {
        self.branch_type == BranchType::Main
    }
}

/// Insert request for a branch row. The store assigns timestamps.
#[derive(Debug, Clone)]
pub struct NewBranch {
    pub id: BranchId,
    pub slug: String,
    pub name: String,
    pub parent_branch_id: Option<BranchId>,
    pub branch_type: BranchType,
    pub data_clone_mode: DataCloneMode,
    pub status: BranchStatus,
    pub created_by: UserId,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub github_repo: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filter for listing branches. `visible_to` restricts the result to branches
/// the given user created or holds a grant on; `None` means project-admin
/// visibility (everything).
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    pub status: Option<BranchStatus>,
    pub branch_type: Option<BranchType>,
    pub github_repo: Option<String>,
    pub created_by: Option<UserId>,
    pub visible_to: Option<UserId>,
    pub limit: i64,
    pub offset: i64,
}

/// Per-branch access grant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessGrant {
    pub branch_id: BranchId,
    pub user_id: UserId,
    pub access_level: AccessLevel,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
}

/// GitHub repository automation policy, one row per repository.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GitHubRepoConfig {
    pub repository: String,
    pub auto_create_on_pr: bool,
    pub auto_delete_on_merge: bool,
    pub default_data_clone_mode: DataCloneMode,
    pub webhook_secret: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record. Events outlive their branch (no cascade) so the
/// trail stays queryable after deletion.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityEvent {
    pub id: i64,
    pub branch_id: BranchId,
    pub actor: UserId,
    pub action: ActivityAction,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivityEvent {
    pub branch_id: BranchId,
    pub actor: UserId,
    pub action: ActivityAction,
    pub detail: Option<String>,
}

/// Interface to the durable metadata store.
///
/// Methods that mutate branch rows are only called by the branch manager;
/// grant mutation is only called by access control. Implementations must make
/// `insert_branch` fail with [`StoreError::UniqueViolation`] on a slug
/// collision (unique-constraint-and-retry, never check-then-insert) and make
/// `transition_status` an atomic check-and-set.
#[async_trait::async_trait]
pub trait BranchStore: Send + Sync + 'static {
    // Branches

    async fn insert_branch(&self, branch: NewBranch) -> Result<Branch>;

    async fn get_branch(&self, id: BranchId) -> Result<Option<Branch>>;

    async fn get_branch_by_slug(&self, slug: &str) -> Result<Option<Branch>>;

    /// The project's single main branch. Missing main is a deployment error.
    async fn main_branch(&self) -> Result<Branch>;

    async fn list_branches(&self, filter: &BranchFilter) -> Result<Vec<Branch>>;

    /// Atomically move a branch from `from` to `to`. Fails with
    /// [`StoreError::StatusConflict`] when the current status is not `from`.
    async fn transition_status(&self, id: BranchId, from: BranchStatus, to: BranchStatus) -> Result<Branch>;

    /// Force a branch into the error state regardless of its current status.
    async fn mark_error(&self, id: BranchId) -> Result<()>;

    /// Remove the branch row and cascade its grants. Activity events are kept.
    async fn delete_branch(&self, id: BranchId) -> Result<bool>;

    async fn count_branches_by_creator(&self, user_id: UserId) -> Result<i64>;

    async fn count_branches(&self) -> Result<i64>;

    /// Active branches whose `expires_at` has passed, for the expiration sweep.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Branch>>;

    // Access grants

    async fn upsert_grant(&self, grant: AccessGrant) -> Result<()>;

    async fn get_grant(&self, branch_id: BranchId, user_id: UserId) -> Result<Option<AccessGrant>>;

    /// Returns true when a grant existed. Deleting a missing grant is not an
    /// error; the caller decides whether that matters.
    async fn delete_grant(&self, branch_id: BranchId, user_id: UserId) -> Result<bool>;

    async fn list_grants(&self, branch_id: BranchId) -> Result<Vec<AccessGrant>>;

    // GitHub repo configs

    async fn upsert_github_config(&self, config: GitHubRepoConfig) -> Result<GitHubRepoConfig>;

    async fn get_github_config(&self, repository: &str) -> Result<Option<GitHubRepoConfig>>;

    async fn list_github_configs(&self) -> Result<Vec<GitHubRepoConfig>>;

    async fn delete_github_config(&self, repository: &str) -> Result<bool>;

    // Activity log

    async fn append_activity(&self, event: NewActivityEvent) -> Result<()>;

    /// Most-recent-first, `limit` and `offset` already clamped by the caller.
    async fn list_activity(&self, branch_id: BranchId, limit: i64, offset: i64) -> Result<Vec<ActivityEvent>>;

    // Active-branch selection (the actor's durable "last selected" default)

    async fn set_selection(&self, user_id: UserId, branch_id: BranchId) -> Result<()>;

    async fn get_selection(&self, user_id: UserId) -> Result<Option<BranchId>>;

    async fn clear_selection(&self, user_id: UserId) -> Result<()>;
}
