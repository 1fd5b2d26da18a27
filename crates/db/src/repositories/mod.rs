//! SQLite implementations of the core persistence traits.

use attest_core::repository::RepositoryError;

pub mod approval;
pub mod audit_log;

pub use approval::SqlApprovalRepository;
pub use audit_log::SqlAuditLogRepository;

pub(crate) fn storage(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(error.to_string())
}

pub(crate) fn decode(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
