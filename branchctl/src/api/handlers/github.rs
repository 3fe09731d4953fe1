//! GitHub repository automation config endpoints. Project-admin only.

use crate::AppState;
use crate::api::models::github::{GitHubRepoConfigRequest, GitHubRepoConfigResponse};
use crate::auth::CurrentUser;
use crate::errors::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

#[utoipa::path(
    get,
    path = "/github/configs",
    tag = "github",
    summary = "List repository automation policies",
    responses(
        (status = 200, description = "Configured repositories", body = Vec<GitHubRepoConfigResponse>),
        (status = 403, description = "Project admin required"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_github_configs(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<GitHubRepoConfigResponse>>> {
    let configs = state.manager.list_github_configs(&user).await?;
    Ok(Json(configs.into_iter().map(GitHubRepoConfigResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/github/configs",
    tag = "github",
    summary = "Create or replace a repository's automation policy",
    request_body = GitHubRepoConfigRequest,
    responses(
        (status = 200, description = "Policy stored", body = GitHubRepoConfigResponse),
        (status = 400, description = "Repository must be owner/name"),
        (status = 403, description = "Project admin required"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all, fields(repository = %request.repository))]
pub async fn upsert_github_config(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<GitHubRepoConfigRequest>,
) -> Result<Json<GitHubRepoConfigResponse>> {
    let config = state.manager.upsert_github_config(&user, request.into()).await?;
    Ok(Json(config.into()))
}

#[utoipa::path(
    get,
    path = "/github/configs/{owner}/{repo}",
    tag = "github",
    summary = "Get a repository's automation policy",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name"),
    ),
    responses(
        (status = 200, description = "Policy", body = GitHubRepoConfigResponse),
        (status = 403, description = "Project admin required"),
        (status = 404, description = "No policy for this repository"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_github_config(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<GitHubRepoConfigResponse>> {
    let repository = format!("{owner}/{repo}");
    let config = state.manager.get_github_config(&user, &repository).await?;
    Ok(Json(config.into()))
}

#[utoipa::path(
    delete,
    path = "/github/configs/{owner}/{repo}",
    tag = "github",
    summary = "Remove a repository's automation policy",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name"),
    ),
    responses(
        (status = 204, description = "Policy removed"),
        (status = 403, description = "Project admin required"),
        (status = 404, description = "No policy for this repository"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_github_config(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<StatusCode> {
    let repository = format!("{owner}/{repo}");
    state.manager.delete_github_config(&user, &repository).await?;
    Ok(StatusCode::NO_CONTENT)
}
