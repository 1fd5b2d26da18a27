use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::domain::approval::{Approval, ApprovalFilter, ApprovalId, ApprovalStatus, DecisionUpdate};
use crate::domain::audit::{AuditAction, AuditLogEntry, AuditQuery, Period, SortOrder};

use super::{
    ApprovalRepository, AuditLogRepository, RepositoryError, ScannedAuditRow, UnreadableAuditRow,
};

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, Approval>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut matching: Vec<Approval> =
            approvals.values().filter(|approval| filter.matches(approval)).cloned().collect();
        matching.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(matching)
    }

    async fn insert_if_absent(&self, approval: &Approval) -> Result<bool, RepositoryError> {
        let mut approvals = self.approvals.write().await;
        if approvals.contains_key(&approval.id.0) {
            return Ok(false);
        }
        approvals.insert(approval.id.0.clone(), approval.clone());
        Ok(true)
    }

    async fn compare_and_set_decision(
        &self,
        id: &ApprovalId,
        expected: ApprovalStatus,
        update: &DecisionUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut approvals = self.approvals.write().await;
        let Some(approval) = approvals.get_mut(&id.0) else {
            return Ok(false);
        };
        if approval.status != expected {
            return Ok(false);
        }
        update.apply_to(approval);
        Ok(true)
    }

    async fn delete(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let mut approvals = self.approvals.write().await;
        Ok(approvals.remove(&id.0))
    }
}

/// Append-only vector of entries. `fail_appends` simulates an unavailable store.
#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    entries: RwLock<Vec<AuditLogEntry>>,
    failing: AtomicBool,
}

impl InMemoryAuditLogRepository {
    pub fn fail_appends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Rewrites a stored comment in place, bypassing the append-only contract.
    pub async fn tamper_comment(&self, id: &str, comment: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|entry| entry.id.0 == id) {
            Some(entry) => {
                entry.comment = comment.to_string();
                true
            }
            None => false,
        }
    }

    /// Rewrites a stored action in place without checking it against the metadata.
    pub async fn tamper_action(&self, id: &str, action: AuditAction) -> bool {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|entry| entry.id.0 == id) {
            Some(entry) => {
                entry.action = action;
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("audit store unavailable".to_string()));
        }
        let mut entries = self.entries.write().await;
        entries.push(entry.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        self.scan(query)
            .await?
            .into_iter()
            .map(|row| row.map_err(|unreadable| RepositoryError::Decode(unreadable.reason)))
            .collect()
    }

    async fn scan(&self, query: &AuditQuery) -> Result<Vec<ScannedAuditRow>, RepositoryError> {
        let entries = self.entries.read().await;
        // Stable sort keeps insertion order for equal timestamps.
        let mut matching: Vec<AuditLogEntry> =
            entries.iter().filter(|entry| query.matches(entry)).cloned().collect();
        matching.sort_by(|left, right| left.timestamp.cmp(&right.timestamp));
        if query.order == SortOrder::Descending {
            matching.reverse();
        }
        Ok(matching
            .into_iter()
            .map(|entry| match entry.validate() {
                Ok(()) => Ok(entry),
                Err(error) => {
                    Err(UnreadableAuditRow { id: entry.id.clone(), reason: error.to_string() })
                }
            })
            .collect())
    }

    async fn time_bounds(&self) -> Result<Option<Period>, RepositoryError> {
        let entries = self.entries.read().await;
        let start = entries.iter().map(|entry| entry.timestamp).min();
        let end = entries.iter().map(|entry| entry.timestamp).max();
        Ok(start.zip(end).map(|(start, end)| Period::new(start, end)))
    }
}
