use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{Approval, ApprovalId, ApprovalStatus, Decision};
use crate::domain::timestamp_now;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLogId(pub String);

impl AuditLogId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Approved,
    Rejected,
    Deleted,
    Restored,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Deleted => "deleted",
            Self::Restored => "restored",
        }
    }

    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl From<Decision> for AuditAction {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => Self::Approved,
            Decision::Rejected => Self::Rejected,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "deleted" => Ok(Self::Deleted),
            "restored" => Ok(Self::Restored),
            other => {
                Err(DomainError::UnknownValue { kind: "audit action", value: other.to_string() })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditMetadata {
    None,
    Deletion { snapshot: Box<Approval> },
    Restoration { original_status: ApprovalStatus, restored_status: ApprovalStatus },
    Alteration { previous_status: ApprovalStatus, new_status: ApprovalStatus },
}

impl AuditMetadata {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deletion { .. } => "deletion",
            Self::Restoration { .. } => "restoration",
            Self::Alteration { .. } => "alteration",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditLogId,
    pub approval_id: ApprovalId,
    pub approver: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub comment: String,
    pub metadata: AuditMetadata,
    /// Hex HMAC over the entry, written once when the trail accepts it.
    pub seal: String,
}

impl AuditLogEntry {
    pub fn new(
        approval_id: ApprovalId,
        approver: impl Into<String>,
        action: AuditAction,
        comment: impl Into<String>,
        metadata: AuditMetadata,
    ) -> Self {
        Self {
            id: AuditLogId::generate(),
            approval_id,
            approver: approver.into(),
            action,
            timestamp: timestamp_now(),
            comment: comment.into(),
            metadata,
            seal: String::new(),
        }
    }

    pub fn snapshot(&self) -> Option<&Approval> {
        match &self.metadata {
            AuditMetadata::Deletion { snapshot } => Some(snapshot),
            _ => None,
        }
    }

    /// Checks that the metadata variant fits the action. Run on every decoded entry.
    pub fn validate(&self) -> Result<(), DomainError> {
        let consistent = match (&self.action, &self.metadata) {
            (AuditAction::Approved | AuditAction::Rejected, AuditMetadata::None) => true,
            (
                AuditAction::Approved | AuditAction::Rejected,
                AuditMetadata::Alteration { new_status, .. },
            ) => new_status.as_str() == self.action.as_str(),
            (AuditAction::Deleted, AuditMetadata::Deletion { snapshot }) => {
                snapshot.id == self.approval_id
            }
            (AuditAction::Restored, AuditMetadata::Restoration { restored_status, .. }) => {
                restored_status.is_pending()
            }
            _ => false,
        };

        if consistent {
            Ok(())
        } else {
            Err(DomainError::InvariantViolation(format!(
                "audit entry {} pairs action `{}` with `{}` metadata",
                self.id,
                self.action,
                self.metadata.kind()
            )))
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Inclusive time window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        self.start <= *instant && *instant <= self.end
    }

    pub fn intersection(&self, other: &Period) -> Option<Period> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(Period { start, end })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub approver: Option<String>,
    pub action: Option<AuditAction>,
    pub approval_id: Option<ApprovalId>,
    pub order: SortOrder,
}

impl AuditQuery {
    pub fn within(period: Period) -> Self {
        Self { start: Some(period.start), end: Some(period.end), ..Self::default() }
    }

    pub fn for_approval(approval_id: ApprovalId) -> Self {
        Self { approval_id: Some(approval_id), ..Self::default() }
    }

    pub fn ascending(mut self) -> Self {
        self.order = SortOrder::Ascending;
        self
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_approver(mut self, approver: impl Into<String>) -> Self {
        self.approver = Some(approver.into());
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.start.map_or(true, |start| entry.timestamp >= start)
            && self.end.map_or(true, |end| entry.timestamp <= end)
            && self.approver.as_deref().map_or(true, |approver| entry.approver == approver)
            && self.action.map_or(true, |action| entry.action == action)
            && self.approval_id.as_ref().map_or(true, |id| entry.approval_id == *id)
    }
}
