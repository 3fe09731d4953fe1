//! Health and pool introspection endpoints.

use crate::AppState;
use crate::auth::CurrentUser;
use crate::errors::{Error, Result};
use crate::pool::RouterStats;
use axum::{Json, extract::State};

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "system",
    summary = "Liveness check",
    responses((status = 200, description = "Service is up")),
)]
pub async fn healthz() -> &'static str {
    "ok"
}

#[utoipa::path(
    get,
    path = "/branches/stats/pools",
    tag = "system",
    summary = "Connection pool statistics",
    responses(
        (status = 200, description = "Per-branch pool stats and global budget", body = RouterStats),
        (status = 403, description = "Project admin required"),
    ),
    security(("X-Branchctl-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn pool_stats(State(state): State<AppState>, user: CurrentUser) -> Result<Json<RouterStats>> {
    if !user.is_admin() {
        return Err(Error::Forbidden {
            action: "inspect".to_string(),
            branch: "connection pools".to_string(),
        });
    }
    Ok(Json(state.pools.stats()))
}
