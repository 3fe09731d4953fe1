//! API models for branch lifecycle endpoints.

use crate::api::models::pagination::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::branches::CreateBranch;
use crate::store::{ActivityEvent, Branch, BranchFilter};
use crate::types::{ActivityAction, BranchId, BranchStatus, BranchType, DataCloneMode, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Request body for creating a branch.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BranchCreateRequest {
    /// Human-readable name; the slug is derived from it.
    pub name: String,
    /// Defaults to `preview`. `main` is not creatable.
    #[serde(default = "default_branch_type")]
    pub branch_type: BranchType,
    #[serde(default = "default_clone_mode")]
    pub data_clone_mode: DataCloneMode,
    /// Branch to clone from; defaults to main.
    #[schema(value_type = Option<String>, format = "uuid")]
    pub parent_branch_id: Option<BranchId>,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub github_repo: Option<String>,
    /// Time to live, e.g. "48h". Overrides the configured preview default.
    #[schema(value_type = Option<String>, example = "48h")]
    pub expires_in: Option<String>,
}

fn default_branch_type() -> BranchType {
    BranchType::Preview
}

fn default_clone_mode() -> DataCloneMode {
    DataCloneMode::SchemaOnly
}

impl TryFrom<BranchCreateRequest> for CreateBranch {
    type Error = crate::errors::Error;

    fn try_from(req: BranchCreateRequest) -> Result<Self, Self::Error> {
        let expires_at = match req.expires_in.as_deref() {
            Some(raw) => {
                let ttl = humantime::parse_duration(raw)
                    .map_err(|_| crate::errors::Error::validation("Invalid expires_in duration"))?;
                Some(Utc::now() + ttl)
            }
            None => None,
        };
        Ok(CreateBranch {
            name: req.name,
            branch_type: req.branch_type,
            data_clone_mode: req.data_clone_mode,
            parent_branch_id: req.parent_branch_id,
            github_pr_number: req.github_pr_number,
            github_pr_url: req.github_pr_url,
            github_repo: req.github_repo,
            expires_at,
        })
    }
}

/// A branch as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BranchResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: BranchId,
    pub slug: String,
    pub name: String,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub parent_branch_id: Option<BranchId>,
    pub branch_type: BranchType,
    pub data_clone_mode: DataCloneMode,
    pub status: BranchStatus,
    #[schema(value_type = String, format = "uuid")]
    pub created_by: UserId,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub github_repo: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Branch> for BranchResponse {
    fn from(branch: Branch) -> Self {
        Self {
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
            created_at: branch.created_at,
            updated_at: branch.updated_at,
        }
    }
}

/// Query parameters for listing branches. Pagination is inlined because axum
/// deserializes the whole query string into one struct.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct BranchListQuery {
    pub status: Option<BranchStatus>,
    #[serde(rename = "type")]
    pub branch_type: Option<BranchType>,
    /// Filter to branches linked to this GitHub repository (owner/name).
    pub github_repo: Option<String>,
    /// Only branches created by the actor.
    #[serde(default)]
    pub mine: bool,
    #[param(default = 0, minimum = 0)]
    pub offset: Option<i64>,
    #[param(default = 50, minimum = 1, maximum = 100)]
    pub limit: Option<i64>,
}

impl BranchListQuery {
    pub fn into_filter(self, actor_id: UserId) -> BranchFilter {
        BranchFilter {
            status: self.status,
            branch_type: self.branch_type,
            github_repo: self.github_repo,
            created_by: self.mine.then_some(actor_id),
            visible_to: None,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

/// Request body for selecting the actor's active branch.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectBranchRequest {
    /// Branch to route the actor's traffic to, by slug or id.
    pub branch: String,
}

/// One entry in a branch's activity log.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActivityEventResponse {
    pub id: i64,
    #[schema(value_type = String, format = "uuid")]
    pub branch_id: BranchId,
    #[schema(value_type = String, format = "uuid")]
    pub actor: UserId,
    pub action: ActivityAction,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<ActivityEvent> for ActivityEventResponse {
    fn from(event: ActivityEvent) -> Self {
        Self {
            id: event.id,
            branch_id: event.branch_id,
            actor: event.actor,
            action: event.action,
            detail: event.detail,
            timestamp: event.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let req: BranchCreateRequest = serde_json::from_str(r#"{"name": "Feature"}"#).unwrap();
        assert_eq!(req.branch_type, BranchType::Preview);
        assert_eq!(req.data_clone_mode, DataCloneMode::SchemaOnly);
        assert!(req.expires_in.is_none());
    }

    #[test]
    fn test_create_request_expires_in_is_humantime() {
        let req: BranchCreateRequest =
            serde_json::from_str(r#"{"name": "Feature", "expires_in": "48h"}"#).unwrap();
        let create: CreateBranch = req.try_into().unwrap();
        let expires_at = create.expires_at.unwrap();
        assert!(expires_at > Utc::now() + chrono::Duration::hours(47));
    }

    #[test]
    fn test_create_request_rejects_bad_expires_in() {
        let req: BranchCreateRequest =
            serde_json::from_str(r#"{"name": "Feature", "expires_in": "next tuesday"}"#).unwrap();
        let err = CreateBranch::try_from(req).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_list_query_clamps_pagination() {
        let actor = uuid::Uuid::new_v4();
        let query = BranchListQuery {
            limit: Some(10_000),
            offset: Some(-3),
            mine: true,
            ..Default::default()
        };
        let filter = query.into_filter(actor);
        assert_eq!(filter.limit, MAX_LIMIT);
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.created_by, Some(actor));
    }
}
