//! Active-branch resolution and selection.
//!
//! `GET /branches/active` answers the question the data plane asks on every
//! request: which branch does this actor's traffic go to right now? The
//! optional [`BRANCH_HEADER`] overrides the durable selection for a single
//! request.

use super::lookup_branch;
use crate::AppState;
use crate::api::models::branches::{BranchResponse, SelectBranchRequest};
use crate::auth::CurrentUser;
use crate::branches::resolver::{BRANCH_HEADER, resolve_active};
use crate::errors::{Error, Result};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};

#[utoipa::path(
    get,
    path = "/branches/active",
    tag = "active-branch",
    summary = "Resolve the actor's active branch",
    params(
        ("x-branchctl-branch" = Option<String>, Header, description = "One-shot branch override (id or slug)"),
    ),
    responses(
        (status = 200, description = "The branch the actor's traffic routes to", body = BranchResponse),
        (status = 404, description = "Override branch not found or not visible"),
        (status = 409, description = "Override branch is not active"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_active_branch(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
) -> Result<Json<BranchResponse>> {
    let override_ref = match headers.get(BRANCH_HEADER) {
        Some(value) => Some(value.to_str().map_err(|e| Error::ValidationError {
            message: format!("Invalid {BRANCH_HEADER} header: {e}"),
        })?),
        None => None,
    };
    let branch = resolve_active(&state.manager, &user, override_ref).await?;
    Ok(Json(branch.into()))
}

#[utoipa::path(
    post,
    path = "/branches/active",
    tag = "active-branch",
    summary = "Select the actor's active branch",
    request_body = SelectBranchRequest,
    responses(
        (status = 200, description = "Selection updated", body = BranchResponse),
        (status = 404, description = "Branch not found or not visible"),
        (status = 409, description = "Branch is not active"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(branch = %request.branch))]
pub async fn select_active_branch(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<SelectBranchRequest>,
) -> Result<Json<BranchResponse>> {
    let branch = lookup_branch(&state, &user, &request.branch).await?;
    let branch = state.manager.select_branch(&user, branch.id).await?;
    Ok(Json(branch.into()))
}

#[utoipa::path(
    delete,
    path = "/branches/active",
    tag = "active-branch",
    summary = "Clear the actor's selection, falling back to main",
    responses(
        (status = 204, description = "Selection cleared"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn clear_active_branch(State(state): State<AppState>, user: CurrentUser) -> Result<StatusCode> {
    state.manager.clear_selection(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}
