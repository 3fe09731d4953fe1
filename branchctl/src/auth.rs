//! Request authentication.
//!
//! Identity is asserted by the platform's auth proxy in front of this service:
//! `x-branchctl-user` carries the acting user's UUID and `x-branchctl-role`
//! their project role. This service never mints identities; it only trusts the
//! headers the proxy injects and enforces branch-level access on top.

use crate::{
    AppState,
    errors::{Error, Result},
    types::{Role, UserId},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{instrument, trace};

pub const USER_HEADER: &str = "x-branchctl-user";
pub const ROLE_HEADER: &str = "x-branchctl-role";

/// The authenticated actor for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Extract the actor from proxy headers.
/// Returns:
/// - None: user header absent (no identity asserted)
/// - Some(Ok(user)): headers present and well-formed
/// - Some(Err(error)): headers present but malformed
fn try_proxy_header_auth(parts: &Parts) -> Option<Result<CurrentUser>> {
    let user_header = parts.headers.get(USER_HEADER)?;

    let user_str = match user_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::ValidationError {
                message: format!("Invalid {USER_HEADER} header: {e}"),
            }));
        }
    };
    let id: UserId = match user_str.parse() {
        Ok(id) => id,
        Err(_) => {
            return Some(Err(Error::ValidationError {
                message: format!("{USER_HEADER} is not a valid user id"),
            }));
        }
    };

    // Role header is optional; absent means plain member.
    let role = match parts.headers.get(ROLE_HEADER).map(|h| h.to_str()) {
        None => Role::Member,
        Some(Ok(s)) => match s.parse() {
            Ok(role) => role,
            Err(_) => {
                return Some(Err(Error::ValidationError {
                    message: format!("{ROLE_HEADER} must be 'admin' or 'member'"),
                }));
            }
        },
        Some(Err(e)) => {
            return Some(Err(Error::ValidationError {
                message: format!("Invalid {ROLE_HEADER} header: {e}"),
            }));
        }
    };

    Some(Ok(CurrentUser { id, role }))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, _state))]
    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self> {
        match try_proxy_header_auth(parts) {
            Some(result) => result,
            None => {
                trace!("No authentication headers found in request");
                Err(Error::Unauthenticated { message: None })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().uri("http://localhost/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _body) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_member_role_is_default() {
        let id = Uuid::new_v4();
        let parts = parts_with_headers(&[(USER_HEADER, &id.to_string())]);
        let user = try_proxy_header_auth(&parts).unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, Role::Member);
        assert!(!user.is_admin());
    }

    #[test]
    fn test_admin_role_header() {
        let id = Uuid::new_v4();
        let parts = parts_with_headers(&[(USER_HEADER, &id.to_string()), (ROLE_HEADER, "admin")]);
        let user = try_proxy_header_auth(&parts).unwrap().unwrap();
        assert!(user.is_admin());
    }

    #[test]
    fn test_missing_header_means_no_identity() {
        let parts = parts_with_headers(&[]);
        assert!(try_proxy_header_auth(&parts).is_none());
    }

    #[test]
    fn test_malformed_user_id_rejected() {
        let parts = parts_with_headers(&[(USER_HEADER, "not-a-uuid")]);
        let err = try_proxy_header_auth(&parts).unwrap().unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let id = Uuid::new_v4();
        let parts = parts_with_headers(&[(USER_HEADER, &id.to_string()), (ROLE_HEADER, "owner")]);
        assert!(try_proxy_header_auth(&parts).unwrap().is_err());
    }
}
