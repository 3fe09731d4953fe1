pub mod access;
pub mod active;
pub mod branches;
pub mod github;
pub mod system;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::errors::Result;
use crate::store::Branch;
use crate::types::BranchId;

/// Resolve a `{id|slug}` path segment to a branch the actor may see.
pub(crate) async fn lookup_branch(state: &AppState, user: &CurrentUser, reference: &str) -> Result<Branch> {
    match reference.parse::<BranchId>() {
        Ok(id) => state.manager.get_visible(user, id).await,
        Err(_) => state.manager.get_visible_by_slug(user, reference).await,
    }
}
