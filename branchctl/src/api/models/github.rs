//! API models for GitHub repository automation config.
//!
//! The webhook secret is write-only: responses expose whether one is set but
//! never echo it back.

use crate::store::GitHubRepoConfig;
use crate::types::DataCloneMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for creating or replacing a repository's automation policy.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GitHubRepoConfigRequest {
    /// Repository in owner/name form.
    pub repository: String,
    #[serde(default)]
    pub auto_create_on_pr: bool,
    #[serde(default)]
    pub auto_delete_on_merge: bool,
    #[serde(default = "default_clone_mode")]
    pub default_data_clone_mode: DataCloneMode,
    pub webhook_secret: Option<String>,
}

fn default_clone_mode() -> DataCloneMode {
    DataCloneMode::SchemaOnly
}

impl From<GitHubRepoConfigRequest> for GitHubRepoConfig {
    fn from(req: GitHubRepoConfigRequest) -> Self {
        Self {
            repository: req.repository,
            auto_create_on_pr: req.auto_create_on_pr,
            auto_delete_on_merge: req.auto_delete_on_merge,
            default_data_clone_mode: req.default_data_clone_mode,
            webhook_secret: req.webhook_secret,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GitHubRepoConfigResponse {
    pub repository: String,
    pub auto_create_on_pr: bool,
    pub auto_delete_on_merge: bool,
    pub default_data_clone_mode: DataCloneMode,
    pub has_webhook_secret: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<GitHubRepoConfig> for GitHubRepoConfigResponse {
    fn from(config: GitHubRepoConfig) -> Self {
        Self {
            repository: config.repository,
            auto_create_on_pr: config.auto_create_on_pr,
            auto_delete_on_merge: config.auto_delete_on_merge,
            default_data_clone_mode: config.default_data_clone_mode,
            has_webhook_secret: config.webhook_secret.is_some(),
            updated_at: config.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_never_exposes_secret() {
        let config = GitHubRepoConfig {
            repository: "acme/api".into(),
            auto_create_on_pr: true,
            auto_delete_on_merge: false,
            default_data_clone_mode: DataCloneMode::SchemaOnly,
            webhook_secret: Some("hunter2".into()),
            updated_at: Utc::now(),
        };
        let response = GitHubRepoConfigResponse::from(config);
        assert!(response.has_webhook_secret);
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
