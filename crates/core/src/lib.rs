pub mod approvals;
pub mod audit;
pub mod authz;
pub mod config;
pub mod domain;
pub mod errors;
pub mod export;
pub mod repository;

pub use approvals::{ApprovalError, ApprovalRegistry, ApprovalResponse};
pub use audit::{AppendOutcome, AuditReportRow, AuditSealer, AuditTrail, VerificationReport};
pub use authz::{Actor, AuthorizationGate, Role};
pub use domain::approval::{Approval, ApprovalId, ApprovalStatus, ApprovalType, NewApproval};
pub use domain::audit::{AuditAction, AuditLogEntry, AuditMetadata, AuditQuery, Period};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use export::{ExportEngine, ExportError, ExportFormat, ReportFile, ReportRequest};
pub use repository::{
    ApprovalRepository, AuditLogRepository, RepositoryError, ScannedAuditRow, UnreadableAuditRow,
};
