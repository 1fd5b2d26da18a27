//! Persistence seams. SQL implementations live in `attest-db`; the in-memory ones back tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::{Approval, ApprovalFilter, ApprovalId, ApprovalStatus, DecisionUpdate};
use crate::domain::audit::{AuditLogEntry, AuditLogId, AuditQuery, Period};

pub mod memory;

pub use memory::{InMemoryApprovalRepository, InMemoryAuditLogRepository};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError>;

    /// Active approvals matching `filter`, newest first.
    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<Approval>, RepositoryError>;

    /// Returns `false` without writing when the id is already active.
    async fn insert_if_absent(&self, approval: &Approval) -> Result<bool, RepositoryError>;

    /// Applies `update` only while the stored status still equals `expected`.
    async fn compare_and_set_decision(
        &self,
        id: &ApprovalId,
        expected: ApprovalStatus,
        update: &DecisionUpdate,
    ) -> Result<bool, RepositoryError>;

    /// Removes the approval and hands back the row as it was at removal.
    async fn delete(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError>;
}

/// A stored audit row that no longer reads back as a valid entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnreadableAuditRow {
    pub id: AuditLogId,
    pub reason: String,
}

pub type ScannedAuditRow = Result<AuditLogEntry, UnreadableAuditRow>;

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError>;

    /// Fails with `Decode` on the first row that does not read back as a valid entry.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, RepositoryError>;

    /// Same rows and order as `query`, with unreadable rows reported one by one.
    async fn scan(&self, query: &AuditQuery) -> Result<Vec<ScannedAuditRow>, RepositoryError>;

    /// Earliest and latest timestamps across every stored entry.
    async fn time_bounds(&self) -> Result<Option<Period>, RepositoryError>;
}
