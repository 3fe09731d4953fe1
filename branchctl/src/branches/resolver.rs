//! Active-branch resolution for data-plane requests.
//!
//! Precedence: an explicit per-request override header, then the actor's
//! durable selection, then the main branch. A stale selection (branch deleted,
//! expired, or no longer visible) is cleared and falls through to main rather
//! than failing the request; an explicit override that cannot be honored is an
//! error, because the caller asked for that branch by name.

use super::BranchManager;
use crate::auth::CurrentUser;
use crate::errors::{Error, Result};
use crate::store::Branch;
use crate::types::{AccessLevel, BranchId, BranchStatus};
use tracing::debug;

/// Per-request branch override: a branch id or slug.
pub const BRANCH_HEADER: &str = "x-branchctl-branch";

pub async fn resolve_active(
    manager: &BranchManager,
    actor: &CurrentUser,
    override_ref: Option<&str>,
) -> Result<Branch> {
    if let Some(reference) = override_ref {
        let branch = match reference.parse::<BranchId>() {
            Ok(id) => manager.get_visible(actor, id).await?,
            Err(_) => manager.get_visible_by_slug(actor, reference).await?,
        };
        manager.access().require(actor, &branch, AccessLevel::Read, "use").await?;
        if branch.status != BranchStatus::Active {
            return Err(Error::InvalidState {
                status: branch.status,
                action: "route queries to".to_string(),
            });
        }
        return Ok(branch);
    }

    if let Some(selected_id) = manager.store().get_selection(actor.id).await? {
        match manager.store().get_branch(selected_id).await? {
            Some(branch)
                if branch.status == BranchStatus::Active
                    && manager.access().level_for(actor, &branch).await?.is_some() =>
            {
                return Ok(branch);
            }
            _ => {
                debug!(user = %actor.id, branch = %selected_id, "clearing stale branch selection");
                manager.store().clear_selection(actor.id).await?;
            }
        }
    }

    Ok(manager.store().main_branch().await.map_err(|_| Error::Internal {
        operation: "resolve the main branch".to_string(),
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branches::test_support::{create_active, fixture, settle};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_defaults_to_main() {
        let fx = fixture().await;
        let branch = resolve_active(&fx.manager, &fx.member, None).await.unwrap();
        assert_eq!(branch.id, fx.main.id);
    }

    #[tokio::test]
    async fn test_selection_wins_over_main() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "sel").await;
        fx.manager.select_branch(&fx.member, branch.id).await.unwrap();

        let resolved = resolve_active(&fx.manager, &fx.member, None).await.unwrap();
        assert_eq!(resolved.id, branch.id);
    }

    #[tokio::test]
    async fn test_override_wins_over_selection() {
        let fx = fixture().await;
        let selected = create_active(&fx, &fx.member, "selected").await;
        let other = create_active(&fx, &fx.member, "other").await;
        fx.manager.select_branch(&fx.member, selected.id).await.unwrap();

        let by_slug = resolve_active(&fx.manager, &fx.member, Some("other")).await.unwrap();
        assert_eq!(by_slug.id, other.id);
        let by_id = resolve_active(&fx.manager, &fx.member, Some(&other.id.to_string()))
            .await
            .unwrap();
        assert_eq!(by_id.id, other.id);
    }

    #[tokio::test]
    async fn test_stale_selection_falls_back_to_main() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "doomed").await;
        fx.manager.select_branch(&fx.member, branch.id).await.unwrap();
        fx.manager.delete(&fx.member, branch.id).await.unwrap();
        assert!(settle(&fx.store, branch.id).await.is_none());

        let resolved = resolve_active(&fx.manager, &fx.member, None).await.unwrap();
        assert_eq!(resolved.id, fx.main.id);
        // The dangling selection was cleaned up.
        assert_eq!(fx.store.get_selection(fx.member.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_explicit_override_of_inactive_branch_fails() {
        let fx = fixture().await;
        let branch = create_active(&fx, &fx.member, "stale").await;
        fx.store.mark_error(branch.id).await.unwrap();

        let err = resolve_active(&fx.manager, &fx.member, Some("stale")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_override_of_invisible_branch_is_not_found() {
        let fx = fixture().await;
        create_active(&fx, &fx.member, "hidden").await;
        let outsider = crate::auth::CurrentUser {
            id: uuid::Uuid::new_v4(),
            role: crate::types::Role::Member,
        };
        let err = resolve_active(&fx.manager, &outsider, Some("hidden")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
