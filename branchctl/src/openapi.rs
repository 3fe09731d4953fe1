//! OpenAPI documentation for the branch management API.
//!
//! The generated document is served at `/api-docs/openapi.json` and rendered
//! by RapiDoc at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api;
use crate::pool;
use crate::types;

/// Security scheme for the proxy-header auth model: the gateway in front of
/// this service authenticates the user and forwards their identity.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Branchctl-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-branchctl-user",
                    "User ID forwarded by the authenticating gateway. \
                     Project admins also carry `x-branchctl-role: admin`.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "branchctl API",
        description = "Branch lifecycle, access control, active-branch routing, \
                       and connection pool management for branched databases."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::branches::list_branches,
        api::handlers::branches::create_branch,
        api::handlers::branches::get_branch,
        api::handlers::branches::delete_branch,
        api::handlers::branches::reset_branch,
        api::handlers::branches::get_branch_activity,
        api::handlers::access::list_access,
        api::handlers::access::grant_access,
        api::handlers::access::revoke_access,
        api::handlers::active::get_active_branch,
        api::handlers::active::select_active_branch,
        api::handlers::active::clear_active_branch,
        api::handlers::github::list_github_configs,
        api::handlers::github::upsert_github_config,
        api::handlers::github::get_github_config,
        api::handlers::github::delete_github_config,
        api::handlers::system::healthz,
        api::handlers::system::pool_stats,
    ),
    components(schemas(
        types::BranchStatus,
        types::BranchType,
        types::DataCloneMode,
        types::AccessLevel,
        types::ActivityAction,
        api::models::branches::BranchCreateRequest,
        api::models::branches::BranchResponse,
        api::models::branches::SelectBranchRequest,
        api::models::branches::ActivityEventResponse,
        api::models::access::GrantAccessRequest,
        api::models::access::AccessGrantResponse,
        api::models::github::GitHubRepoConfigRequest,
        api::models::github::GitHubRepoConfigResponse,
        pool::RouterStats,
        pool::BranchPoolStats,
    )),
    tags(
        (name = "branches", description = "Branch lifecycle"),
        (name = "access", description = "Branch sharing"),
        (name = "active-branch", description = "Active-branch resolution and selection"),
        (name = "github", description = "GitHub repository automation policies"),
        (name = "system", description = "Health and pool introspection"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_builds() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().unwrap();
        assert!(json.contains("/branches"));
        assert!(json.contains("/branches/active"));
        assert!(json.contains("x-branchctl-user"));
    }
}
