//! Branch-level access control.
//!
//! Effective access is the strongest of: project-admin role (admin on every
//! branch), branch creator (admin on their branch), an explicit grant, or the
//! baseline every member holds on the main branch (write: main is the shared
//! default database, not a protected resource at this layer).

use crate::auth::CurrentUser;
use crate::errors::{Error, Result};
use crate::store::{AccessGrant, Branch, BranchStore};
use crate::types::{AccessLevel, UserId};
use chrono::Utc;
use std::sync::Arc;

pub struct AccessControl {
    store: Arc<dyn BranchStore>,
}

impl AccessControl {
    pub fn new(store: Arc<dyn BranchStore>) -> Self {
        Self { store }
    }

    /// The actor's effective access level on a branch, `None` when the branch
    /// is invisible to them.
    pub async fn level_for(&self, actor: &CurrentUser, branch: &Branch) -> Result<Option<AccessLevel>> {
        if actor.is_admin() || branch.created_by == actor.id {
            return Ok(Some(AccessLevel::Admin));
        }
        let granted = self.store.get_grant(branch.id, actor.id).await?.map(|g| g.access_level);
        if branch.is_main() {
            return Ok(Some(granted.map_or(AccessLevel::Write, |g| g.max(AccessLevel::Write))));
        }
        Ok(granted)
    }

    /// Require at least `level`, reporting NotFound for invisible branches so
    /// their existence is not leaked.
    pub async fn require(
        &self,
        actor: &CurrentUser,
        branch: &Branch,
        level: AccessLevel,
        action: &str,
    ) -> Result<()> {
        match self.level_for(actor, branch).await? {
            None => Err(Error::not_found("Branch", branch.id)),
            Some(held) if held >= level => Ok(()),
            Some(_) => Err(Error::Forbidden {
                action: action.to_string(),
                branch: branch.slug.clone(),
            }),
        }
    }

    /// Grant `level` to `user_id`. Requires branch admin. Granting to the
    /// branch creator is a no-op validation error; they already hold admin.
    pub async fn grant(
        &self,
        actor: &CurrentUser,
        branch: &Branch,
        user_id: UserId,
        level: AccessLevel,
    ) -> Result<AccessGrant> {
        self.require(actor, branch, AccessLevel::Admin, "share").await?;
        if user_id == branch.created_by {
            return Err(Error::validation("Branch creator already has admin access"));
        }
        let grant = AccessGrant {
            branch_id: branch.id,
            user_id,
            access_level: level,
            granted_by: actor.id,
            granted_at: Utc::now(),
        };
        self.store.upsert_grant(grant.clone()).await?;
        Ok(grant)
    }

    /// Revoke `user_id`'s grant. Requires branch admin. Revoking is
    /// idempotent; returns whether a grant actually existed.
    pub async fn revoke(&self, actor: &CurrentUser, branch: &Branch, user_id: UserId) -> Result<bool> {
        self.require(actor, branch, AccessLevel::Admin, "unshare").await?;
        Ok(self.store.delete_grant(branch.id, user_id).await?)
    }

    pub async fn list(&self, actor: &CurrentUser, branch: &Branch) -> Result<Vec<AccessGrant>> {
        self.require(actor, branch, AccessLevel::Read, "view").await?;
        Ok(self.store.list_grants(branch.id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewBranch, memory::InMemoryBranchStore};
    use crate::types::{BranchStatus, BranchType, DataCloneMode, Role};
    use axum::http::StatusCode;
    use uuid::Uuid;

    fn member(id: UserId) -> CurrentUser {
        CurrentUser { id, role: Role::Member }
    }

    async fn seed_branch(store: &Arc<dyn BranchStore>, branch_type: BranchType, created_by: UserId) -> Branch {
        store
            .insert_branch(NewBranch {
                id: Uuid::new_v4(),
                slug: format!("b-{}", Uuid::new_v4().simple()),
                name: "b".into(),
                parent_branch_id: None,
                branch_type,
                data_clone_mode: DataCloneMode::SchemaOnly,
                status: BranchStatus::Active,
                created_by,
                github_pr_number: None,
                github_pr_url: None,
                github_repo: None,
                expires_at: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_creator_has_admin_outsider_has_nothing() {
        let store: Arc<dyn BranchStore> = Arc::new(InMemoryBranchStore::new());
        let access = AccessControl::new(store.clone());
        let creator = member(Uuid::new_v4());
        let outsider = member(Uuid::new_v4());
        let branch = seed_branch(&store, BranchType::Preview, creator.id).await;

        assert_eq!(
            access.level_for(&creator, &branch).await.unwrap(),
            Some(AccessLevel::Admin)
        );
        assert_eq!(access.level_for(&outsider, &branch).await.unwrap(), None);

        // Invisible branches 404 rather than 403.
        let err = access
            .require(&outsider, &branch, AccessLevel::Read, "view")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_every_member_can_write_main() {
        let store: Arc<dyn BranchStore> = Arc::new(InMemoryBranchStore::new());
        let access = AccessControl::new(store.clone());
        let outsider = member(Uuid::new_v4());
        let main = seed_branch(&store, BranchType::Main, Uuid::new_v4()).await;

        assert_eq!(
            access.level_for(&outsider, &main).await.unwrap(),
            Some(AccessLevel::Write)
        );
        let err = access
            .require(&outsider, &main, AccessLevel::Admin, "delete")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_grant_and_revoke() {
        let store: Arc<dyn BranchStore> = Arc::new(InMemoryBranchStore::new());
        let access = AccessControl::new(store.clone());
        let creator = member(Uuid::new_v4());
        let guest = member(Uuid::new_v4());
        let branch = seed_branch(&store, BranchType::Preview, creator.id).await;

        access
            .grant(&creator, &branch, guest.id, AccessLevel::Read)
            .await
            .unwrap();
        assert_eq!(
            access.level_for(&guest, &branch).await.unwrap(),
            Some(AccessLevel::Read)
        );

        // Read access is not enough to share.
        let stranger = Uuid::new_v4();
        let err = access
            .grant(&guest, &branch, stranger, AccessLevel::Read)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        assert!(access.revoke(&creator, &branch, guest.id).await.unwrap());
        assert_eq!(access.level_for(&guest, &branch).await.unwrap(), None);

        // Revoking again is a harmless no-op.
        assert!(!access.revoke(&creator, &branch, guest.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_project_admin_sees_everything() {
        let store: Arc<dyn BranchStore> = Arc::new(InMemoryBranchStore::new());
        let access = AccessControl::new(store.clone());
        let admin = CurrentUser {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let branch = seed_branch(&store, BranchType::Preview, Uuid::new_v4()).await;

        assert_eq!(
            access.level_for(&admin, &branch).await.unwrap(),
            Some(AccessLevel::Admin)
        );
    }
}
