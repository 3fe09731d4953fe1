//! API models for branch sharing endpoints.

use crate::store::AccessGrant;
use crate::types::{AccessLevel, BranchId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for granting a user access to a branch.
#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantAccessRequest {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub access_level: AccessLevel,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccessGrantResponse {
    #[schema(value_type = String, format = "uuid")]
    pub branch_id: BranchId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub access_level: AccessLevel,
    #[schema(value_type = String, format = "uuid")]
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
}

impl From<AccessGrant> for AccessGrantResponse {
    fn from(grant: AccessGrant) -> Self {
        Self {
            branch_id: grant.branch_id,
            user_id: grant.user_id,
            access_level: grant.access_level,
            granted_by: grant.granted_by,
            granted_at: grant.granted_at,
        }
    }
}
