//! Branch lifecycle endpoints.
//!
//! Handlers stay thin: decode, delegate to the manager, encode. All policy
//! (access, quotas, state transitions) lives behind the manager. Branches are
//! addressable by id or slug in the path.

use super::lookup_branch;
use crate::AppState;
use crate::api::models::Pagination;
use crate::api::models::branches::{ActivityEventResponse, BranchCreateRequest, BranchListQuery, BranchResponse};
use crate::auth::CurrentUser;
use crate::errors::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

#[utoipa::path(
    get,
    path = "/branches",
    tag = "branches",
    summary = "List branches visible to the actor",
    params(BranchListQuery),
    responses(
        (status = 200, description = "List of branches", body = Vec<BranchResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_branches(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<BranchListQuery>,
) -> Result<Json<Vec<BranchResponse>>> {
    let filter = query.into_filter(user.id);
    let branches = state.manager.list(&user, filter).await?;
    Ok(Json(branches.into_iter().map(BranchResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/branches",
    tag = "branches",
    summary = "Create a branch",
    request_body = BranchCreateRequest,
    responses(
        (status = 201, description = "Branch accepted; provisioning continues in the background", body = BranchResponse),
        (status = 400, description = "Invalid branch name or parameters"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Branch quota exceeded"),
        (status = 503, description = "Branching disabled"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(name = %request.name))]
pub async fn create_branch(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<BranchCreateRequest>,
) -> Result<(StatusCode, Json<BranchResponse>)> {
    let branch = state.manager.create(&user, request.try_into()?).await?;
    Ok((StatusCode::CREATED, Json(branch.into())))
}

#[utoipa::path(
    get,
    path = "/branches/{id}",
    tag = "branches",
    summary = "Get a branch",
    params(("id" = String, Path, description = "Branch ID or slug")),
    responses(
        (status = 200, description = "Branch details", body = BranchResponse),
        (status = 404, description = "Branch not found or not visible"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %reference))]
pub async fn get_branch(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<BranchResponse>> {
    let branch = lookup_branch(&state, &user, &reference).await?;
    Ok(Json(branch.into()))
}

#[utoipa::path(
    delete,
    path = "/branches/{id}",
    tag = "branches",
    summary = "Delete a branch and its database",
    params(("id" = String, Path, description = "Branch ID or slug")),
    responses(
        (status = 204, description = "Branch accepted for deletion; teardown continues in the background"),
        (status = 400, description = "The main branch cannot be deleted"),
        (status = 403, description = "Admin access on the branch required"),
        (status = 404, description = "Branch not found or not visible"),
        (status = 409, description = "Branch is mid-operation"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %reference))]
pub async fn delete_branch(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<StatusCode> {
    let branch = lookup_branch(&state, &user, &reference).await?;
    state.manager.delete(&user, branch.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/branches/{id}/reset",
    tag = "branches",
    summary = "Reset a branch to its parent's current state",
    params(("id" = String, Path, description = "Branch ID or slug")),
    responses(
        (status = 200, description = "Reset started; the rebuild continues in the background", body = BranchResponse),
        (status = 400, description = "The main branch cannot be reset"),
        (status = 403, description = "Write access required"),
        (status = 404, description = "Branch not found or not visible"),
        (status = 409, description = "Branch is not active"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %reference))]
pub async fn reset_branch(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<BranchResponse>> {
    let branch = lookup_branch(&state, &user, &reference).await?;
    let branch = state.manager.reset(&user, branch.id).await?;
    Ok(Json(branch.into()))
}

#[utoipa::path(
    get,
    path = "/branches/{id}/activity",
    tag = "branches",
    summary = "Branch activity log, most recent first",
    params(
        ("id" = String, Path, description = "Branch ID or slug"),
        Pagination,
    ),
    responses(
        (status = 200, description = "Activity events", body = Vec<ActivityEventResponse>),
        (status = 404, description = "Branch not found or not visible"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %reference))]
pub async fn get_branch_activity(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ActivityEventResponse>>> {
    let branch = lookup_branch(&state, &user, &reference).await?;
    let events = state
        .manager
        .activity(&user, branch.id, pagination.limit(), pagination.offset())
        .await?;
    Ok(Json(events.into_iter().map(ActivityEventResponse::from).collect()))
}
