//! Approval lifecycle: create, resolve, alter, delete and restore.
//!
//! Every status change is a compare-and-set on the stored status, so concurrent callers
//! can never both win the same transition. Each committed change is followed by one audit
//! entry through [`AuditTrail::record`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::audit::AuditTrail;
use crate::authz::{Actor, AuthorizationGate};
use crate::domain::approval::{
    Approval, ApprovalFilter, ApprovalId, ApprovalStatus, Decision, DecisionUpdate, NewApproval,
};
use crate::domain::audit::{AuditAction, AuditLogEntry, AuditMetadata};
use crate::domain::timestamp_now;
use crate::errors::{ApplicationError, DomainError};
use crate::repository::{ApprovalRepository, RepositoryError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval `{0}` not found")]
    NotFound(ApprovalId),
    #[error("`{actor}` is not permitted to {operation}")]
    PermissionDenied { actor: String, operation: &'static str },
    #[error("approval `{0}` already exists")]
    AlreadyExists(ApprovalId),
    #[error("approval `{id}` is already {status}")]
    AlreadyResolved { id: ApprovalId, status: ApprovalStatus },
    #[error("approval `{id}` is {actual}, caller expected {expected}")]
    StatusMismatch { id: ApprovalId, expected: ApprovalStatus, actual: ApprovalStatus },
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

impl ApprovalError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists(_) | Self::AlreadyResolved { .. } | Self::StatusMismatch { .. }
        )
    }
}

impl From<ApprovalError> for ApplicationError {
    fn from(value: ApprovalError) -> Self {
        match value {
            ApprovalError::NotFound(id) => Self::NotFound(format!("approval {id}")),
            ApprovalError::PermissionDenied { .. } => Self::PermissionDenied(value.to_string()),
            ApprovalError::AlreadyExists(_)
            | ApprovalError::AlreadyResolved { .. }
            | ApprovalError::StatusMismatch { .. } => Self::Conflict(value.to_string()),
            ApprovalError::Validation(error) => Self::Domain(error),
            ApprovalError::Persistence(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// A decision as submitted by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalResponse {
    pub decision: Decision,
    pub justification: String,
    /// Caller intends to overwrite an earlier decision.
    pub is_alteration: bool,
    /// Status the caller believes is stored; checked before an alteration is written.
    pub previous_status: Option<ApprovalStatus>,
}

impl ApprovalResponse {
    pub fn decide(decision: Decision, justification: impl Into<String>) -> Self {
        Self {
            decision,
            justification: justification.into(),
            is_alteration: false,
            previous_status: None,
        }
    }

    pub fn alter(
        decision: Decision,
        justification: impl Into<String>,
        previous_status: Option<ApprovalStatus>,
    ) -> Self {
        Self { decision, justification: justification.into(), is_alteration: true, previous_status }
    }
}

pub struct ApprovalRegistry {
    approvals: Arc<dyn ApprovalRepository>,
    trail: Arc<AuditTrail>,
    gate: AuthorizationGate,
}

impl ApprovalRegistry {
    pub fn new(approvals: Arc<dyn ApprovalRepository>, trail: Arc<AuditTrail>) -> Self {
        Self { approvals, trail, gate: AuthorizationGate }
    }

    pub fn trail(&self) -> &Arc<AuditTrail> {
        &self.trail
    }

    pub async fn create_approval(&self, input: NewApproval) -> Result<Approval, ApprovalError> {
        let approval = input.into_approval(timestamp_now())?;
        if !self.approvals.insert_if_absent(&approval).await? {
            return Err(ApprovalError::AlreadyExists(approval.id));
        }

        info!(
            event_name = "approval.created",
            approval_id = %approval.id,
            approval_type = %approval.approval_type,
            requester = %approval.requester,
            "approval request created"
        );
        Ok(approval)
    }

    pub async fn get_approval_by_id(&self, id: &ApprovalId) -> Result<Approval, ApprovalError> {
        self.approvals.find_by_id(id).await?.ok_or_else(|| ApprovalError::NotFound(id.clone()))
    }

    pub async fn list_approvals(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<Approval>, ApprovalError> {
        Ok(self.approvals.list(filter).await?)
    }

    pub async fn respond_to_approval(
        &self,
        id: &ApprovalId,
        actor: &Actor,
        response: ApprovalResponse,
    ) -> Result<Approval, ApprovalError> {
        let current = self.get_approval_by_id(id).await?;
        if current.status.is_pending() {
            return self.resolve(current, actor, response).await;
        }

        if !self.gate.can_alter_decisions(&actor.role) {
            if response.is_alteration {
                return Err(ApprovalError::PermissionDenied {
                    actor: actor.email.clone(),
                    operation: "alter a recorded decision",
                });
            }
            return Err(ApprovalError::AlreadyResolved { id: id.clone(), status: current.status });
        }

        if let Some(expected) = response.previous_status {
            if expected != current.status {
                return Err(ApprovalError::StatusMismatch {
                    id: id.clone(),
                    expected,
                    actual: current.status,
                });
            }
        }

        self.alter(current, actor, response).await
    }

    pub async fn delete_approval(
        &self,
        id: &ApprovalId,
        actor: &Actor,
    ) -> Result<(), ApprovalError> {
        let Some(snapshot) = self.approvals.delete(id).await? else {
            return Err(ApprovalError::NotFound(id.clone()));
        };

        let status = snapshot.status;
        self.trail
            .record(AuditLogEntry::new(
                id.clone(),
                actor.email.clone(),
                AuditAction::Deleted,
                String::new(),
                AuditMetadata::Deletion { snapshot: Box::new(snapshot) },
            ))
            .await;

        info!(
            event_name = "approval.deleted",
            approval_id = %id,
            actor = %actor.email,
            status = %status,
            "approval deleted; snapshot kept in audit trail"
        );
        Ok(())
    }

    pub async fn restore_approval(
        &self,
        id: &ApprovalId,
        snapshot: Approval,
        restored_by: &Actor,
    ) -> Result<Approval, ApprovalError> {
        if !self.gate.can_restore(&restored_by.role) {
            return Err(ApprovalError::PermissionDenied {
                actor: restored_by.email.clone(),
                operation: "restore a deleted approval",
            });
        }
        if snapshot.id != *id {
            return Err(ApprovalError::Validation(DomainError::InvariantViolation(format!(
                "snapshot describes approval `{}`, not `{id}`",
                snapshot.id
            ))));
        }
        snapshot.validate()?;

        let original_status = snapshot.status;
        let restored = Approval { status: ApprovalStatus::Pending, ..snapshot };
        if !self.approvals.insert_if_absent(&restored).await? {
            return Err(ApprovalError::AlreadyExists(id.clone()));
        }

        self.trail
            .record(AuditLogEntry::new(
                id.clone(),
                restored_by.email.clone(),
                AuditAction::Restored,
                String::new(),
                AuditMetadata::Restoration {
                    original_status,
                    restored_status: ApprovalStatus::Pending,
                },
            ))
            .await;

        info!(
            event_name = "approval.restored",
            approval_id = %id,
            actor = %restored_by.email,
            original_status = %original_status,
            "approval restored as pending"
        );
        Ok(restored)
    }

    /// Restores from the newest deletion snapshot held by the audit trail.
    pub async fn restore_from_audit_trail(
        &self,
        id: &ApprovalId,
        restored_by: &Actor,
    ) -> Result<Approval, ApprovalError> {
        if !self.gate.can_restore(&restored_by.role) {
            return Err(ApprovalError::PermissionDenied {
                actor: restored_by.email.clone(),
                operation: "restore a deleted approval",
            });
        }
        let snapshot = self
            .trail
            .deletion_snapshot(id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(id.clone()))?;
        self.restore_approval(id, snapshot, restored_by).await
    }

    pub async fn history(&self, id: &ApprovalId) -> Result<Vec<AuditLogEntry>, ApprovalError> {
        Ok(self.trail.history(id).await?)
    }

    async fn resolve(
        &self,
        current: Approval,
        actor: &Actor,
        response: ApprovalResponse,
    ) -> Result<Approval, ApprovalError> {
        let update = decision_update(actor, &response);
        let committed = self
            .approvals
            .compare_and_set_decision(&current.id, ApprovalStatus::Pending, &update)
            .await?;
        if !committed {
            return Err(self.lost_race(&current.id).await);
        }

        self.trail
            .record(AuditLogEntry::new(
                current.id.clone(),
                actor.email.clone(),
                AuditAction::from(response.decision),
                response.justification,
                AuditMetadata::None,
            ))
            .await;

        info!(
            event_name = "approval.resolved",
            approval_id = %current.id,
            actor = %actor.email,
            status = %update.status,
            "approval resolved"
        );

        let mut resolved = current;
        update.apply_to(&mut resolved);
        Ok(resolved)
    }

    async fn alter(
        &self,
        current: Approval,
        actor: &Actor,
        response: ApprovalResponse,
    ) -> Result<Approval, ApprovalError> {
        let previous_status = current.status;
        let update = decision_update(actor, &response);
        let committed = self
            .approvals
            .compare_and_set_decision(&current.id, previous_status, &update)
            .await?;
        if !committed {
            let actual = self.get_approval_by_id(&current.id).await?.status;
            warn!(
                event_name = "approval.alter_conflict",
                approval_id = %current.id,
                expected = %previous_status,
                actual = %actual,
                "approval changed while an alteration was in flight"
            );
            return Err(ApprovalError::StatusMismatch {
                id: current.id,
                expected: previous_status,
                actual,
            });
        }

        self.trail
            .record(AuditLogEntry::new(
                current.id.clone(),
                actor.email.clone(),
                AuditAction::from(response.decision),
                response.justification,
                AuditMetadata::Alteration { previous_status, new_status: update.status },
            ))
            .await;

        info!(
            event_name = "approval.altered",
            approval_id = %current.id,
            actor = %actor.email,
            previous_status = %previous_status,
            status = %update.status,
            "recorded decision altered"
        );

        let mut altered = current;
        update.apply_to(&mut altered);
        Ok(altered)
    }

    async fn lost_race(&self, id: &ApprovalId) -> ApprovalError {
        match self.approvals.find_by_id(id).await {
            Ok(Some(approval)) => {
                ApprovalError::AlreadyResolved { id: id.clone(), status: approval.status }
            }
            Ok(None) => ApprovalError::NotFound(id.clone()),
            Err(error) => ApprovalError::Persistence(error),
        }
    }
}

fn decision_update(actor: &Actor, response: &ApprovalResponse) -> DecisionUpdate {
    DecisionUpdate {
        status: response.decision.status(),
        justification: response.justification.clone(),
        response_by: actor.email.clone(),
        response_at: timestamp_now(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use super::{ApprovalError, ApprovalRegistry, ApprovalResponse};
    use crate::audit::{AuditSealer, AuditTrail};
    use crate::authz::{Actor, Role};
    use crate::domain::approval::{
        ApprovalFilter, ApprovalId, ApprovalStatus, ApprovalType, Decision, NewApproval,
    };
    use crate::domain::audit::{AuditAction, AuditMetadata, AuditQuery};
    use crate::domain::timestamp_now;
    use crate::errors::{ApplicationError, DomainError};
    use crate::repository::{InMemoryApprovalRepository, InMemoryAuditLogRepository};

    struct Fixture {
        registry: Arc<ApprovalRegistry>,
        entries: Arc<InMemoryAuditLogRepository>,
    }

    fn fixture() -> Fixture {
        let approvals = Arc::new(InMemoryApprovalRepository::default());
        let entries = Arc::new(InMemoryAuditLogRepository::default());
        let trail = Arc::new(AuditTrail::new(
            entries.clone(),
            approvals.clone(),
            AuditSealer::new(SecretString::from("registry-test-key-01".to_string())),
        ));
        Fixture { registry: Arc::new(ApprovalRegistry::new(approvals, trail)), entries }
    }

    fn actor(email: &str, role: Role) -> Actor {
        Actor::new(format!("id-{email}"), email, role)
    }

    fn purchase() -> NewApproval {
        NewApproval {
            approval_type: ApprovalType::Purchase,
            amount: Some(Decimal::new(10050, 2)),
            requester: "a@x".to_string(),
            approver: "b@x".to_string(),
            description: "new laptop".to_string(),
        }
    }

    #[tokio::test]
    async fn create_rejects_amount_rule_violations() {
        let fx = fixture();
        let mut missing = purchase();
        missing.amount = None;
        let mut vacation = purchase();
        vacation.approval_type = ApprovalType::Vacation;

        assert!(matches!(
            fx.registry.create_approval(missing).await,
            Err(ApprovalError::Validation(DomainError::InvariantViolation(_)))
        ));
        assert!(matches!(
            fx.registry.create_approval(vacation).await,
            Err(ApprovalError::Validation(_))
        ));
        assert!(fx.registry.list_approvals(&ApprovalFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let fx = fixture();
        let id = ApprovalId::generate();
        let admin = actor("admin@x", Role::Admin);

        assert_eq!(
            fx.registry.get_approval_by_id(&id).await,
            Err(ApprovalError::NotFound(id.clone()))
        );
        assert_eq!(
            fx.registry
                .respond_to_approval(&id, &admin, ApprovalResponse::decide(Decision::Approved, ""))
                .await,
            Err(ApprovalError::NotFound(id.clone()))
        );
        assert_eq!(
            fx.registry.delete_approval(&id, &admin).await,
            Err(ApprovalError::NotFound(id.clone()))
        );
        assert_eq!(
            fx.registry.restore_from_audit_trail(&id, &admin).await,
            Err(ApprovalError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn lifecycle_create_approve_delete_restore() {
        let fx = fixture();
        let approver = actor("b@x", Role::Approver);
        let manager = actor("m@x", Role::Manager);
        let admin = actor("admin@x", Role::Admin);

        let created = fx.registry.create_approval(purchase()).await.unwrap();
        assert_eq!(created.status, ApprovalStatus::Pending);

        let approved = fx
            .registry
            .respond_to_approval(
                &created.id,
                &approver,
                ApprovalResponse::decide(Decision::Approved, "within budget"),
            )
            .await
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.response_by.as_deref(), Some("b@x"));
        assert_eq!(fx.registry.history(&created.id).await.unwrap().len(), 1);

        let second = fx
            .registry
            .respond_to_approval(
                &created.id,
                &manager,
                ApprovalResponse::decide(Decision::Rejected, "changed my mind"),
            )
            .await;
        assert!(matches!(second, Err(ApprovalError::AlreadyResolved { .. })));
        assert_eq!(
            fx.registry.get_approval_by_id(&created.id).await.unwrap().status,
            ApprovalStatus::Approved
        );

        fx.registry.delete_approval(&created.id, &admin).await.unwrap();
        assert!(matches!(
            fx.registry.get_approval_by_id(&created.id).await,
            Err(ApprovalError::NotFound(_))
        ));

        let history = fx.registry.history(&created.id).await.unwrap();
        assert_eq!(history.len(), 2);
        let deletion = &history[1];
        assert_eq!(deletion.action, AuditAction::Deleted);
        let snapshot = deletion.snapshot().expect("deletion carries a snapshot");
        assert_eq!(snapshot.status, ApprovalStatus::Approved);

        let restored = fx.registry.restore_from_audit_trail(&created.id, &admin).await.unwrap();
        assert_eq!(restored.status, ApprovalStatus::Pending);
        assert_eq!(restored.id, created.id);
        assert_eq!(restored.amount, Some(Decimal::new(10050, 2)));
        assert_eq!(restored.requester, "a@x");
        assert_eq!(restored.description, "new laptop");

        let history = fx.registry.history(&created.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history[2].metadata,
            AuditMetadata::Restoration {
                original_status: ApprovalStatus::Approved,
                restored_status: ApprovalStatus::Pending,
            }
        );
    }

    #[tokio::test]
    async fn only_admins_alter_recorded_decisions() {
        let fx = fixture();
        let created = fx.registry.create_approval(purchase()).await.unwrap();
        fx.registry
            .respond_to_approval(
                &created.id,
                &actor("b@x", Role::Approver),
                ApprovalResponse::decide(Decision::Approved, "ok"),
            )
            .await
            .unwrap();

        let denied = fx
            .registry
            .respond_to_approval(
                &created.id,
                &actor("m@x", Role::Manager),
                ApprovalResponse::alter(Decision::Rejected, "over budget", None),
            )
            .await;
        assert!(matches!(denied, Err(ApprovalError::PermissionDenied { .. })));

        let altered = fx
            .registry
            .respond_to_approval(
                &created.id,
                &actor("admin@x", Role::Admin),
                ApprovalResponse::alter(
                    Decision::Rejected,
                    "over budget",
                    Some(ApprovalStatus::Approved),
                ),
            )
            .await
            .unwrap();
        assert_eq!(altered.status, ApprovalStatus::Rejected);
        assert_eq!(altered.justification, "over budget");

        let history = fx.registry.history(&created.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action, AuditAction::Rejected);
        assert_eq!(
            history[1].metadata,
            AuditMetadata::Alteration {
                previous_status: ApprovalStatus::Approved,
                new_status: ApprovalStatus::Rejected,
            }
        );
    }

    #[tokio::test]
    async fn stale_previous_status_is_a_conflict() {
        let fx = fixture();
        let admin = actor("admin@x", Role::Admin);
        let created = fx.registry.create_approval(purchase()).await.unwrap();
        fx.registry
            .respond_to_approval(&created.id, &admin, ApprovalResponse::decide(Decision::Rejected, ""))
            .await
            .unwrap();

        let error = fx
            .registry
            .respond_to_approval(
                &created.id,
                &admin,
                ApprovalResponse::alter(Decision::Approved, "", Some(ApprovalStatus::Approved)),
            )
            .await
            .unwrap_err();

        assert_eq!(
            error,
            ApprovalError::StatusMismatch {
                id: created.id.clone(),
                expected: ApprovalStatus::Approved,
                actual: ApprovalStatus::Rejected,
            }
        );
        assert!(error.is_conflict());
        assert!(matches!(ApplicationError::from(error), ApplicationError::Conflict(_)));
    }

    #[tokio::test]
    async fn restore_checks_permission_before_existence() {
        let fx = fixture();
        let created = fx.registry.create_approval(purchase()).await.unwrap();

        let denied = fx
            .registry
            .restore_approval(&created.id, created.clone(), &actor("m@x", Role::Manager))
            .await;
        assert!(matches!(denied, Err(ApprovalError::PermissionDenied { .. })));

        let unknown_role = fx
            .registry
            .restore_approval(&created.id, created.clone(), &actor("x@x", Role::parse("root")))
            .await;
        assert!(matches!(unknown_role, Err(ApprovalError::PermissionDenied { .. })));

        let active = fx
            .registry
            .restore_approval(&created.id, created.clone(), &actor("admin@x", Role::Admin))
            .await;
        assert_eq!(active, Err(ApprovalError::AlreadyExists(created.id.clone())));
    }

    #[tokio::test]
    async fn non_admin_restore_is_denied_for_deleted_and_unknown_ids() {
        let fx = fixture();
        let manager = actor("m@x", Role::Manager);
        let admin = actor("admin@x", Role::Admin);
        let created = fx.registry.create_approval(purchase()).await.unwrap();
        fx.registry.delete_approval(&created.id, &admin).await.unwrap();
        let entries_after_delete = fx.entries.len().await;

        let deleted = fx.registry.restore_approval(&created.id, created.clone(), &manager).await;
        assert!(matches!(deleted, Err(ApprovalError::PermissionDenied { .. })));
        let deleted_via_trail = fx.registry.restore_from_audit_trail(&created.id, &manager).await;
        assert!(matches!(deleted_via_trail, Err(ApprovalError::PermissionDenied { .. })));

        let never_created = purchase().into_approval(timestamp_now()).unwrap();
        let unknown = fx
            .registry
            .restore_approval(&never_created.id, never_created.clone(), &manager)
            .await;
        assert!(matches!(unknown, Err(ApprovalError::PermissionDenied { .. })));
        let unknown_via_trail =
            fx.registry.restore_from_audit_trail(&never_created.id, &manager).await;
        assert!(matches!(unknown_via_trail, Err(ApprovalError::PermissionDenied { .. })));

        assert!(matches!(
            fx.registry.get_approval_by_id(&created.id).await,
            Err(ApprovalError::NotFound(_))
        ));
        assert!(matches!(
            fx.registry.get_approval_by_id(&never_created.id).await,
            Err(ApprovalError::NotFound(_))
        ));
        assert_eq!(fx.entries.len().await, entries_after_delete);
    }

    #[tokio::test]
    async fn restore_rejects_a_snapshot_for_another_id() {
        let fx = fixture();
        let admin = actor("admin@x", Role::Admin);
        let created = fx.registry.create_approval(purchase()).await.unwrap();
        fx.registry.delete_approval(&created.id, &admin).await.unwrap();

        let result =
            fx.registry.restore_approval(&ApprovalId::generate(), created.clone(), &admin).await;
        assert!(matches!(result, Err(ApprovalError::Validation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_resolutions_have_one_winner() {
        let fx = fixture();
        let created = fx.registry.create_approval(purchase()).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..8 {
            let registry = fx.registry.clone();
            let id = created.id.clone();
            handles.push(tokio::spawn(async move {
                let decision = if index % 2 == 0 { Decision::Approved } else { Decision::Rejected };
                registry
                    .respond_to_approval(
                        &id,
                        &actor(&format!("approver{index}@x"), Role::Approver),
                        ApprovalResponse::decide(decision, "race"),
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(error) => assert!(matches!(error, ApprovalError::AlreadyResolved { .. })),
            }
        }

        assert_eq!(winners, 1);
        let decisions = fx
            .registry
            .trail()
            .query(&AuditQuery::for_approval(created.id.clone()))
            .await
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(fx.entries.len().await, 1);
    }

    #[tokio::test]
    async fn audit_outage_does_not_undo_a_decision() {
        let fx = fixture();
        let created = fx.registry.create_approval(purchase()).await.unwrap();
        fx.entries.fail_appends(true);

        let approved = fx
            .registry
            .respond_to_approval(
                &created.id,
                &actor("b@x", Role::Approver),
                ApprovalResponse::decide(Decision::Approved, "ok"),
            )
            .await
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(fx.registry.trail().deferred_count(), 1);

        fx.entries.fail_appends(false);
        fx.registry.trail().retry_deferred().await;
        assert_eq!(fx.registry.history(&created.id).await.unwrap().len(), 1);
    }
}
