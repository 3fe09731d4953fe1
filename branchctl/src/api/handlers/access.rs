//! Branch sharing endpoints.

use super::lookup_branch;
use crate::AppState;
use crate::api::models::access::{AccessGrantResponse, GrantAccessRequest};
use crate::auth::CurrentUser;
use crate::errors::Result;
use crate::types::UserId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

#[utoipa::path(
    get,
    path = "/branches/{id}/access",
    tag = "access",
    summary = "List a branch's access grants",
    params(("id" = String, Path, description = "Branch ID or slug")),
    responses(
        (status = 200, description = "Access grants", body = Vec<AccessGrantResponse>),
        (status = 404, description = "Branch not found or not visible"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %reference))]
pub async fn list_access(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<Vec<AccessGrantResponse>>> {
    let branch = lookup_branch(&state, &user, &reference).await?;
    let grants = state.manager.access().list(&user, &branch).await?;
    Ok(Json(grants.into_iter().map(AccessGrantResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/branches/{id}/access",
    tag = "access",
    summary = "Grant a user access to a branch",
    params(("id" = String, Path, description = "Branch ID or slug")),
    request_body = GrantAccessRequest,
    responses(
        (status = 201, description = "Access granted", body = AccessGrantResponse),
        (status = 400, description = "Grantee already owns the branch"),
        (status = 403, description = "Admin access on the branch required"),
        (status = 404, description = "Branch not found or not visible"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %reference))]
pub async fn grant_access(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
    Json(request): Json<GrantAccessRequest>,
) -> Result<(StatusCode, Json<AccessGrantResponse>)> {
    let branch = lookup_branch(&state, &user, &reference).await?;
    let grant = state
        .manager
        .share(&user, branch.id, request.user_id, request.access_level)
        .await?;
    Ok((StatusCode::CREATED, Json(grant.into())))
}

#[utoipa::path(
    delete,
    path = "/branches/{id}/access/{user_id}",
    tag = "access",
    summary = "Revoke a user's access to a branch",
    params(
        ("id" = String, Path, description = "Branch ID or slug"),
        ("user_id" = String, Path, format = "uuid", description = "User whose grant is revoked"),
    ),
    responses(
        (status = 204, description = "Access revoked, or no grant existed"),
        (status = 403, description = "Admin access on the branch required"),
        (status = 404, description = "Branch not found or not visible"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %reference))]
pub async fn revoke_access(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((reference, user_id)): Path<(String, UserId)>,
) -> Result<StatusCode> {
    let branch = lookup_branch(&state, &user, &reference).await?;
    state.manager.unshare(&user, branch.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
