//! Postgres-backed [`BranchStore`].
//!
//! All statements are plain runtime-bound queries against the schema in
//! `migrations/`. Slug uniqueness and the single-main invariant live in the
//! schema; status changes use an `UPDATE ... WHERE status = $from` check-and-set
//! so concurrent lifecycle calls race safely.

use super::{
    AccessGrant, ActivityEvent, Branch, BranchFilter, BranchStore, GitHubRepoConfig, NewActivityEvent, NewBranch,
    Result, StoreError,
};
use crate::types::{BranchId, BranchStatus, UserId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::query_builder::QueryBuilder;

#[derive(Clone)]
pub struct PgBranchStore {
    pool: PgPool,
}

impl PgBranchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BranchStore for PgBranchStore {
    async fn insert_branch(&self, branch: NewBranch) -> Result<Branch> {
        let row = sqlx::query_as::<_, Branch>(
            r#"INSERT INTO branches
               (id, slug, name, parent_branch_id, branch_type, data_clone_mode, status,
                created_by, github_pr_number, github_pr_url, github_repo, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING *"#,
        )
        .bind(branch.id)
        .bind(&branch.slug)
        .bind(&branch.name)
        .bind(branch.parent_branch_id)
        .bind(branch.branch_type)
        .bind(branch.data_clone_mode)
        .bind(branch.status)
        .bind(branch.created_by)
        .bind(branch.github_pr_number)
        .bind(&branch.github_pr_url)
        .bind(&branch.github_repo)
        .bind(branch.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_branch(&self, id: BranchId) -> Result<Option<Branch>> {
        let row = sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_branch_by_slug(&self, slug: &str) -> Result<Option<Branch>> {
        let row = sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn main_branch(&self) -> Result<Branch> {
        let row = sqlx::query_as::<_, Branch>("SELECT * FROM branches WHERE branch_type = 'main'")
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(StoreError::NotFound)
    }

    async fn list_branches(&self, filter: &BranchFilter) -> Result<Vec<Branch>> {
        let mut query = QueryBuilder::new("SELECT b.* FROM branches b WHERE 1=1");
        if let Some(status) = filter.status {
            query.push(" AND b.status = ").push_bind(status);
        }
        if let Some(branch_type) = filter.branch_type {
            query.push(" AND b.branch_type = ").push_bind(branch_type);
        }
        if let Some(repo) = &filter.github_repo {
            query.push(" AND b.github_repo = ").push_bind(repo.clone());
        }
        if let Some(created_by) = filter.created_by {
            query.push(" AND b.created_by = ").push_bind(created_by);
        }
        if let Some(user_id) = filter.visible_to {
            query
                .push(" AND (b.branch_type = 'main' OR b.created_by = ")
                .push_bind(user_id)
                .push(" OR EXISTS (SELECT 1 FROM branch_access a WHERE a.branch_id = b.id AND a.user_id = ")
                .push_bind(user_id)
                .push("))");
        }
        query
            .push(" ORDER BY b.created_at DESC, b.id LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = query.build_query_as::<Branch>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn transition_status(&self, id: BranchId, from: BranchStatus, to: BranchStatus) -> Result<Branch> {
        let updated = sqlx::query_as::<_, Branch>(
            "UPDATE branches SET status = $1, updated_at = now() WHERE id = $2 AND status = $3 RETURNING *",
        )
        .bind(to)
        .bind(id)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(branch) => Ok(branch),
            None => {
                // Distinguish a missing row from a status race.
                let current = self.get_branch(id).await?.ok_or(StoreError::NotFound)?;
                Err(StoreError::StatusConflict {
                    expected: from,
                    actual: current.status,
                })
            }
        }
    }

    async fn mark_error(&self, id: BranchId) -> Result<()> {
        let result = sqlx::query("UPDATE branches SET status = 'error', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_branch(&self, id: BranchId) -> Result<bool> {
        // Grants and selections cascade via FK.
        let result = sqlx::query("DELETE FROM branches WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_branches_by_creator(&self, user_id: UserId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM branches WHERE created_by = $1 AND branch_type <> 'main'")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn count_branches(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM branches WHERE branch_type <> 'main'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Branch>> {
        let rows = sqlx::query_as::<_, Branch>(
            "SELECT * FROM branches WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_grant(&self, grant: AccessGrant) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO branch_access (branch_id, user_id, access_level, granted_by, granted_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (branch_id, user_id)
               DO UPDATE SET access_level = EXCLUDED.access_level,
                             granted_by = EXCLUDED.granted_by,
                             granted_at = EXCLUDED.granted_at"#,
        )
        .bind(grant.branch_id)
        .bind(grant.user_id)
        .bind(grant.access_level)
        .bind(grant.granted_by)
        .bind(grant.granted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_grant(&self, branch_id: BranchId, user_id: UserId) -> Result<Option<AccessGrant>> {
        let row =
            sqlx::query_as::<_, AccessGrant>("SELECT * FROM branch_access WHERE branch_id = $1 AND user_id = $2")
                .bind(branch_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn delete_grant(&self, branch_id: BranchId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM branch_access WHERE branch_id = $1 AND user_id = $2")
            .bind(branch_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_grants(&self, branch_id: BranchId) -> Result<Vec<AccessGrant>> {
        let rows = sqlx::query_as::<_, AccessGrant>(
            "SELECT * FROM branch_access WHERE branch_id = $1 ORDER BY granted_at",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_github_config(&self, config: GitHubRepoConfig) -> Result<GitHubRepoConfig> {
        let row = sqlx::query_as::<_, GitHubRepoConfig>(
            r#"INSERT INTO github_repo_configs
               (repository, auto_create_on_pr, auto_delete_on_merge, default_data_clone_mode, webhook_secret, updated_at)
               VALUES ($1, $2, $3, $4, $5, now())
               ON CONFLICT (repository)
               DO UPDATE SET auto_create_on_pr = EXCLUDED.auto_create_on_pr,
                             auto_delete_on_merge = EXCLUDED.auto_delete_on_merge,
                             default_data_clone_mode = EXCLUDED.default_data_clone_mode,
                             webhook_secret = EXCLUDED.webhook_secret,
                             updated_at = now()
               RETURNING *"#,
        )
        .bind(&config.repository)
        .bind(config.auto_create_on_pr)
        .bind(config.auto_delete_on_merge)
        .bind(config.default_data_clone_mode)
        .bind(&config.webhook_secret)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_github_config(&self, repository: &str) -> Result<Option<GitHubRepoConfig>> {
        let row = sqlx::query_as::<_, GitHubRepoConfig>("SELECT * FROM github_repo_configs WHERE repository = $1")
            .bind(repository)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_github_configs(&self) -> Result<Vec<GitHubRepoConfig>> {
        let rows = sqlx::query_as::<_, GitHubRepoConfig>("SELECT * FROM github_repo_configs ORDER BY repository")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete_github_config(&self, repository: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM github_repo_configs WHERE repository = $1")
            .bind(repository)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_activity(&self, event: NewActivityEvent) -> Result<()> {
        sqlx::query("INSERT INTO branch_activity (branch_id, actor, action, detail) VALUES ($1, $2, $3, $4)")
            .bind(event.branch_id)
            .bind(event.actor)
            .bind(event.action)
            .bind(&event.detail)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_activity(&self, branch_id: BranchId, limit: i64, offset: i64) -> Result<Vec<ActivityEvent>> {
        let rows = sqlx::query_as::<_, ActivityEvent>(
            "SELECT * FROM branch_activity WHERE branch_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3",
        )
        .bind(branch_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_selection(&self, user_id: UserId, branch_id: BranchId) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO branch_selections (user_id, branch_id) VALUES ($1, $2)
               ON CONFLICT (user_id) DO UPDATE SET branch_id = EXCLUDED.branch_id"#,
        )
        .bind(user_id)
        .bind(branch_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_selection(&self, user_id: UserId) -> Result<Option<BranchId>> {
        let row: Option<BranchId> = sqlx::query_scalar("SELECT branch_id FROM branch_selections WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn clear_selection(&self, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM branch_selections WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
