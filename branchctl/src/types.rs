//! Common type definitions shared across the crate.
//!
//! All entity IDs are UUIDs wrapped in type aliases for better type safety:
//!
//! - [`BranchId`]: Branch identifier
//! - [`UserId`]: Acting user identifier (minted by the external Auth collaborator)
//!
//! The branch lifecycle and access-control vocabulary lives here too so the
//! store, manager, and API layers all speak the same enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type BranchId = Uuid;
pub type UserId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Lifecycle state of a branch.
///
/// Transitions are enforced by the manager, not the store:
/// `creating -> {active, error}`, `active -> {resetting, expired}`,
/// `resetting -> {active, error}`, `expired -> deleting -> (removed)`.
/// `error` is terminal absent an explicit delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum BranchStatus {
    Creating,
    Active,
    Resetting,
    Expired,
    Deleting,
    Error,
}

impl BranchStatus {
    /// Whether the lifecycle state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: BranchStatus) -> bool {
        use BranchStatus::*;
        matches!(
            (self, next),
            (Creating, Active)
                | (Creating, Error)
                | (Active, Resetting)
                | (Active, Expired)
                | (Active, Deleting)
                | (Resetting, Active)
                | (Resetting, Error)
                | (Expired, Deleting)
                | (Error, Deleting)
        )
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchStatus::Creating => "creating",
            BranchStatus::Active => "active",
            BranchStatus::Resetting => "resetting",
            BranchStatus::Expired => "expired",
            BranchStatus::Deleting => "deleting",
            BranchStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BranchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(BranchStatus::Creating),
            "active" => Ok(BranchStatus::Active),
            "resetting" => Ok(BranchStatus::Resetting),
            "expired" => Ok(BranchStatus::Expired),
            "deleting" => Ok(BranchStatus::Deleting),
            "error" => Ok(BranchStatus::Error),
            other => Err(format!("unknown branch status: {other}")),
        }
    }
}

/// Kind of branch. Exactly one branch per project is `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum BranchType {
    Main,
    Preview,
    Persistent,
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchType::Main => "main",
            BranchType::Preview => "preview",
            BranchType::Persistent => "persistent",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BranchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(BranchType::Main),
            "preview" => Ok(BranchType::Preview),
            "persistent" => Ok(BranchType::Persistent),
            other => Err(format!("unknown branch type: {other}")),
        }
    }
}

/// How a new branch's initial contents are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum DataCloneMode {
    SchemaOnly,
    FullClone,
}

impl fmt::Display for DataCloneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataCloneMode::SchemaOnly => "schema_only",
            DataCloneMode::FullClone => "full_clone",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DataCloneMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema_only" => Ok(DataCloneMode::SchemaOnly),
            "full_clone" => Ok(DataCloneMode::FullClone),
            other => Err(format!("unknown data clone mode: {other}")),
        }
    }
}

/// Per-branch access level. Ordered: `Admin` implies `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            other => Err(format!("unknown access level: {other}")),
        }
    }
}

/// Project-level role of the acting user, as asserted by the external Auth
/// collaborator. Project admins see and can manage every branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Audited action recorded in the branch activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Reset,
    AccessGranted,
    AccessRevoked,
    Expired,
    Deleted,
    Error,
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityAction::Created => "created",
            ActivityAction::Reset => "reset",
            ActivityAction::AccessGranted => "access_granted",
            ActivityAction::AccessRevoked => "access_revoked",
            ActivityAction::Expired => "expired",
            ActivityAction::Deleted => "deleted",
            ActivityAction::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ActivityAction::Created),
            "reset" => Ok(ActivityAction::Reset),
            "access_granted" => Ok(ActivityAction::AccessGranted),
            "access_revoked" => Ok(ActivityAction::AccessRevoked),
            "expired" => Ok(ActivityAction::Expired),
            "deleted" => Ok(ActivityAction::Deleted),
            "error" => Ok(ActivityAction::Error),
            other => Err(format!("unknown activity action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use BranchStatus::*;
        assert!(Creating.can_transition_to(Active));
        assert!(Creating.can_transition_to(Error));
        assert!(Active.can_transition_to(Resetting));
        assert!(Active.can_transition_to(Expired));
        assert!(Resetting.can_transition_to(Active));
        assert!(Expired.can_transition_to(Deleting));

        // error is terminal except for explicit delete
        assert!(Error.can_transition_to(Deleting));
        assert!(!Error.can_transition_to(Active));

        assert!(!Deleting.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Creating.can_transition_to(Resetting));
    }

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::Admin > AccessLevel::Write);
        assert!(AccessLevel::Write > AccessLevel::Read);
        assert_eq!("admin".parse::<AccessLevel>().unwrap(), AccessLevel::Admin);
        assert!("owner".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
