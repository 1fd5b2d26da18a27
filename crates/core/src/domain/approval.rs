use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form used in report columns.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    Purchase,
    Reimbursement,
    Vacation,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Reimbursement => "reimbursement",
            Self::Vacation => "vacation",
        }
    }

    pub fn requires_amount(&self) -> bool {
        !matches!(self, Self::Vacation)
    }
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "purchase" => Ok(Self::Purchase),
            "reimbursement" => Ok(Self::Reimbursement),
            "vacation" => Ok(Self::Vacation),
            other => {
                Err(DomainError::UnknownValue { kind: "approval type", value: other.to_string() })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => {
                Err(DomainError::UnknownValue { kind: "approval status", value: other.to_string() })
            }
        }
    }
}

/// Outcome chosen by whoever responds to an approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.parse::<ApprovalStatus>()? {
            ApprovalStatus::Approved => Ok(Self::Approved),
            ApprovalStatus::Rejected => Ok(Self::Rejected),
            ApprovalStatus::Pending => {
                Err(DomainError::UnknownValue { kind: "decision", value: value.to_string() })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    pub amount: Option<Decimal>,
    pub requester: String,
    pub approver: String,
    pub description: String,
    pub justification: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub response_at: Option<DateTime<Utc>>,
    pub response_by: Option<String>,
}

impl Approval {
    pub fn validate(&self) -> Result<(), DomainError> {
        check_amount(self.approval_type, self.amount)
    }
}

/// Input accepted by `ApprovalRegistry::create_approval`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApproval {
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    pub amount: Option<Decimal>,
    pub requester: String,
    pub approver: String,
    pub description: String,
}

impl NewApproval {
    pub fn into_approval(self, now: DateTime<Utc>) -> Result<Approval, DomainError> {
        check_amount(self.approval_type, self.amount)?;

        Ok(Approval {
            id: ApprovalId::generate(),
            approval_type: self.approval_type,
            amount: self.amount,
            requester: self.requester,
            approver: self.approver,
            description: self.description,
            justification: String::new(),
            status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
            response_at: None,
            response_by: None,
        })
    }
}

/// Fields written by a decision. Applied through a compare-and-set on the stored status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionUpdate {
    pub status: ApprovalStatus,
    pub justification: String,
    pub response_by: String,
    pub response_at: DateTime<Utc>,
}

impl DecisionUpdate {
    pub fn apply_to(&self, approval: &mut Approval) {
        approval.status = self.status;
        approval.justification = self.justification.clone();
        approval.response_by = Some(self.response_by.clone());
        approval.response_at = Some(self.response_at);
        approval.updated_at = self.response_at;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    pub requester: Option<String>,
    pub approver: Option<String>,
}

impl ApprovalFilter {
    pub fn matches(&self, approval: &Approval) -> bool {
        self.status.map_or(true, |status| approval.status == status)
            && self.requester.as_deref().map_or(true, |requester| approval.requester == requester)
            && self.approver.as_deref().map_or(true, |approver| approval.approver == approver)
    }
}

pub fn check_amount(approval_type: ApprovalType, amount: Option<Decimal>) -> Result<(), DomainError> {
    match (approval_type.requires_amount(), amount) {
        (true, None) => Err(DomainError::InvariantViolation(format!(
            "amount is required for {approval_type} requests"
        ))),
        (false, Some(_)) => Err(DomainError::InvariantViolation(format!(
            "{approval_type} requests must not carry an amount"
        ))),
        _ => Ok(()),
    }
}
