//! Request and response types for the HTTP API.

pub mod access;
pub mod branches;
pub mod github;
pub mod pagination;

pub use pagination::Pagination;
