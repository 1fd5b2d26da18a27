//! Role capability table. Every role check in the crate goes through [`AuthorizationGate`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Approver,
    Auditor,
    Requester,
    /// Any role string the table does not know. Carries no capability.
    Unrecognized(String),
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match normalize_key(raw).as_str() {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            "approver" => Self::Approver,
            "auditor" => Self::Auditor,
            "requester" => Self::Requester,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Approver => "approver",
            Self::Auditor => "auditor",
            Self::Requester => "requester",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(value))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    AlterDecisions,
    Restore,
    Approve,
    ViewAudit,
}

const CAPABILITIES: &[(Capability, &[&str])] = &[
    (Capability::AlterDecisions, &["admin"]),
    (Capability::Restore, &["admin"]),
    (Capability::Approve, &["admin", "manager", "approver"]),
    (Capability::ViewAudit, &["admin", "auditor"]),
];

#[derive(Clone, Copy, Debug, Default)]
pub struct AuthorizationGate;

impl AuthorizationGate {
    pub fn allows(&self, role: &Role, capability: Capability) -> bool {
        if matches!(role, Role::Unrecognized(_)) {
            return false;
        }

        CAPABILITIES
            .iter()
            .find(|(candidate, _)| *candidate == capability)
            .is_some_and(|(_, roles)| roles.contains(&role.as_str()))
    }

    pub fn can_alter_decisions(&self, role: &Role) -> bool {
        self.allows(role, Capability::AlterDecisions)
    }

    pub fn can_restore(&self, role: &Role) -> bool {
        self.allows(role, Capability::Restore)
    }

    pub fn can_approve(&self, role: &Role) -> bool {
        self.allows(role, Capability::Approve)
    }

    pub fn can_view_audit(&self, role: &Role) -> bool {
        self.allows(role, Capability::ViewAudit)
    }
}

/// Authenticated caller handed in by the transport layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), email: email.into(), role }
    }
}

fn normalize_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
