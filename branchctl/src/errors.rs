use crate::branches::provision::ProvisionError;
use crate::pool::PoolError;
use crate::store::StoreError;
use crate::types::BranchStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Actor lacks the required access level for the branch operation
    #[error("Insufficient access to {action} branch {branch}")]
    Forbidden { action: String, branch: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    ValidationError { message: String },

    /// Requested resource not found (or not visible to the actor)
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// Branching is disabled by configuration
    #[error("Branching is disabled")]
    BranchingDisabled,

    /// Per-user or per-project branch quota reached
    #[error("Branch quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// Connection budget exhausted or pool saturated
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Operation not legal in the branch's current lifecycle state
    #[error("Branch is {status}, cannot {action}")]
    InvalidState { status: BranchStatus, action: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Metadata store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Physical provisioning error
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::ValidationError { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::ValidationError { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BranchingDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Error::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Pool(pool_err) => match pool_err {
                PoolError::BranchSaturated(_) | PoolError::GlobalBudgetExhausted => StatusCode::SERVICE_UNAVAILABLE,
                PoolError::Closed(_) => StatusCode::CONFLICT,
                PoolError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::InvalidState { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Store(store_err) => match store_err {
                StoreError::NotFound => StatusCode::NOT_FOUND,
                StoreError::UniqueViolation { .. } => StatusCode::CONFLICT,
                StoreError::StatusConflict { .. } => StatusCode::CONFLICT,
                StoreError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Provision(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => {
                message.clone().unwrap_or_else(|| "Authentication required".to_string())
            }
            Error::Forbidden { action, branch } => {
                format!("Insufficient access to {action} branch {branch}")
            }
            Error::ValidationError { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} {id} not found"),
            Error::BranchingDisabled => "Branching is disabled for this project".to_string(),
            Error::QuotaExceeded { message } => message.clone(),
            Error::Pool(pool_err) => match pool_err {
                PoolError::BranchSaturated(_) => "No free connections for this branch, try again shortly".to_string(),
                PoolError::GlobalBudgetExhausted => "Connection budget exhausted, try again shortly".to_string(),
                PoolError::Closed(_) => "Branch is not accepting connections".to_string(),
                PoolError::Backend(_) => "Internal server error".to_string(),
            },
            Error::InvalidState { status, action } => {
                format!("Branch is {status}, cannot {action}")
            }
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Store(store_err) => match store_err {
                StoreError::NotFound => "Resource not found".to_string(),
                StoreError::UniqueViolation { constraint, .. } => match constraint.as_deref() {
                    Some(c) if c.contains("slug") => "A branch with this name already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                StoreError::StatusConflict { actual, .. } => {
                    format!("Branch state changed concurrently (now {actual}), retry the operation")
                }
                StoreError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Provision(_) => "Branch provisioning failed".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Store(StoreError::Other(_))
            | Error::Internal { .. }
            | Error::Other(_)
            | Error::Provision(_)
            | Error::Pool(PoolError::Backend(_)) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Pool(_) => {
                tracing::warn!("Pool pressure: {}", self);
            }
            Error::Store(_) | Error::InvalidState { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::QuotaExceeded { .. } | Error::BranchingDisabled => {
                tracing::info!("Rejected request: {}", self);
            }
            Error::ValidationError { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        (status, self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::BranchingDisabled.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            Error::QuotaExceeded {
                message: "limit".into()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::Pool(PoolError::GlobalBudgetExhausted).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Store(StoreError::UniqueViolation {
                constraint: Some("branches_slug_key".into()),
                message: "dup".into()
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::not_found("Branch", Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = Error::Other(anyhow::anyhow!("connection refused to 10.0.0.3:5432"));
        assert_eq!(err.user_message(), "Internal server error");

        let err = Error::Store(StoreError::UniqueViolation {
            constraint: Some("branches_slug_key".into()),
            message: "duplicate key value".into(),
        });
        assert_eq!(err.user_message(), "A branch with this name already exists");
    }
}
